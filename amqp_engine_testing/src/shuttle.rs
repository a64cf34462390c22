//! Pump frames between two engines as if they were connected by a wire.

use amqp_engine::{Engine, Result};

/// Upper bound on pump rounds before [`exchange`] gives up.
pub const MAX_ROUNDS: usize = 64;

/// Move every frame `from` has written into `to`. Returns how many frames
/// moved.
///
/// # Errors
///
/// Stops at the first frame `to` rejects and returns its error.
pub fn pump(from: &mut Engine, to: &mut Engine) -> Result<usize> {
    let frames = from.pipeline_mut().drain();
    let moved = frames.len();
    for frame in frames {
        to.ingest(frame.channel, frame.performative, frame.payload)?;
    }
    Ok(moved)
}

/// Pump in both directions until neither engine has anything to say.
/// Returns the number of frames moved.
///
/// # Errors
///
/// Returns the first ingest error.
///
/// # Panics
///
/// Panics if the engines are still talking after [`MAX_ROUNDS`] rounds.
pub fn exchange(a: &mut Engine, b: &mut Engine) -> Result<usize> {
    let mut total = 0;
    for _ in 0..MAX_ROUNDS {
        let moved = pump(a, b)? + pump(b, a)?;
        if moved == 0 {
            return Ok(total);
        }
        total += moved;
    }
    panic!("engines still exchanging frames after {MAX_ROUNDS} rounds");
}
