// Actuator side: command channel
// sends ASCII commands to the actuator controller over serial with a settle
// delay after each one, and composes them (plus recording) into the fixed
// trial choreography.

pub mod link;
pub mod trial;
