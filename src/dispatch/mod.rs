pub mod dispatcher;
pub mod groups;
pub mod registry;
pub mod widget;

pub use dispatcher::{
    DispatchReport, Dispatcher, DispatcherConfig, OverlapPolicy, RefreshOutcome, Unregister,
};
pub use groups::{ALL_TOKEN, TypeGroupTable, TypeGroupTableBuilder};
pub use registry::{ActionError, RefreshAction, RefreshFuture, SubscriberRegistry};
pub use widget::WidgetHandle;
