// Telemetry side: mocap feed ingest
// receives single-marker UDP datagrams on a dedicated thread, keeps only the
// newest sample in a lock-guarded slot, and optionally records it to CSV
// from a second background thread.

pub mod sample;
pub mod receiver;
pub mod recorder;
