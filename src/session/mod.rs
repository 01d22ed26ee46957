// Session side: the operator console
// owns the rig (link, telemetry, recording), keeps the menu/speed-entry state
// on the control thread, and drives a full-screen terminal through a small
// capability trait so it can run headless in tests.

pub mod state;
pub mod terminal;
pub mod rig;
pub mod control;
