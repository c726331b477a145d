mod synth;

pub use synth::{SynthOptions, cmd_synth};
