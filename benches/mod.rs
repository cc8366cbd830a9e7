use criterion::{criterion_group, criterion_main};


criterion_group!(
    benches,
    client::bench_get_exchange,
    client::bench_chunked_response,
    client::bench_ws_frame_send
);
criterion_main!(benches);
