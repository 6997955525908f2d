use criterion::{Criterion, black_box, criterion_group, criterion_main};

use dashboard_refresh::core::{FrameDecoder, InboundMessage, JsonDecoder, PushFrame, encode_message};
use dashboard_refresh::dispatch::{
    ALL_TOKEN, Dispatcher, DispatcherConfig, RefreshAction, TypeGroupTable,
};

const FRAMES: usize = 1000;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap()
}

fn dispatcher_with(widgets: usize) -> Dispatcher {
    let members: Vec<String> = (0..widgets).step_by(4).map(|i| format!("widget-{i}")).collect();
    let groups = TypeGroupTable::builder()
        .group("scale", members)
        .build()
        .unwrap();
    let dispatcher = Dispatcher::new(DispatcherConfig::immediate(), groups);
    for i in 0..widgets {
        // Registrations live as long as the dispatcher; the capabilities are not needed.
        let _ = dispatcher.register(format!("widget-{i}"), RefreshAction::new(|| async { Ok(()) }));
    }
    dispatcher
}

fn bench_decode_1000_push_frames(c: &mut Criterion) {
    let frames: Vec<PushFrame> = (0..FRAMES)
        .map(|i| match i % 3 {
            0 => PushFrame::text(encode_message(&InboundMessage::new_data("scale"))),
            1 => PushFrame::text(encode_message(&InboundMessage::refresh_widget(format!(
                "widget-{i}"
            )))),
            _ => PushFrame::text_static(r#"{"type":"refresh_all"}"#),
        })
        .collect();

    c.bench_function("decode_1000_push_frames", |b| {
        let mut decoder = JsonDecoder;
        b.iter(|| {
            for frame in &frames {
                black_box(decoder.decode(black_box(frame)));
            }
        })
    });
}

fn bench_fan_out(c: &mut Criterion) {
    let rt = runtime();
    for widgets in [8usize, 64, 256] {
        let dispatcher = dispatcher_with(widgets);

        c.bench_function(&format!("fan_out_all_w{widgets}"), |b| {
            b.iter(|| {
                let report = rt.block_on(async { dispatcher.refresh_by_type(ALL_TOKEN).await });
                black_box(report.invoked())
            })
        });

        c.bench_function(&format!("fan_out_group_w{widgets}"), |b| {
            b.iter(|| {
                let message = InboundMessage::new_data("scale");
                let report = rt.block_on(async { dispatcher.handle_message(&message).await });
                black_box(report.invoked())
            })
        });
    }
}

criterion_group!(benches, bench_decode_1000_push_frames, bench_fan_out);
criterion_main!(benches);
