use futures_util::future::BoxFuture;

use super::dispatcher::{Dispatcher, RefreshOutcome, Unregister};
use crate::core::WidgetId;

/// Registration owned by one active widget.
///
/// Created by [`Dispatcher::activate`]. Dropping the handle (or calling
/// [`deactivate`](Self::deactivate)) unregisters the widget, but only if its registration has not
/// been replaced in the meantime.
#[derive(Debug)]
pub struct WidgetHandle {
    dispatcher: Dispatcher,
    registration: Option<Unregister>,
}

impl WidgetHandle {
    pub(crate) fn new(dispatcher: Dispatcher, registration: Unregister) -> Self {
        Self {
            dispatcher,
            registration: Some(registration),
        }
    }

    pub fn widget_id(&self) -> Option<&WidgetId> {
        self.registration.as_ref().map(Unregister::widget_id)
    }

    /// True while at least one refresh of this widget is in flight.
    pub fn is_refreshing(&self) -> bool {
        self.widget_id()
            .is_some_and(|id| self.dispatcher.is_refreshing(id))
    }

    /// Manually trigger a refresh of this widget, e.g. from a retry button.
    pub fn refresh(&self) -> BoxFuture<'static, RefreshOutcome> {
        match self.widget_id() {
            Some(id) => self.dispatcher.refresh_widget(id),
            None => Box::pin(futures_util::future::ready(RefreshOutcome::Skipped)),
        }
    }

    /// Unregister now. Returns whether this handle's registration was still current.
    pub fn deactivate(mut self) -> bool {
        self.release()
    }

    fn release(&mut self) -> bool {
        self.registration
            .take()
            .is_some_and(Unregister::unregister)
    }
}

impl Drop for WidgetHandle {
    fn drop(&mut self) {
        self.release();
    }
}
