//! # Training Loop Example
//!
//! Profiles iterations 10..20 of a simulated 30-iteration training loop:
//! - Opening and closing the capture window from the loop counter
//! - Bracketing forward, zero_grad, backward and optimizer phases
//! - Keeping the event stack balanced when the loop exits early
//!
//! ## Run this example:
//! ```bash
//! RUST_LOG=trace cargo run -p loopscope --example train_loop
//! ```
//!
//! Under Nsight Systems (with the `cuda` feature):
//! ```bash
//! nsys profile --capture-range=cudaProfilerApi \
//!     cargo run -p loopscope --features cuda --example train_loop
//! ```

use std::thread;
use std::time::Duration;

use loopscope::prelude::*;
use tracing_subscriber::EnvFilter;

const ITERATIONS: u64 = 30;

fn simulate(work_us: u64) -> Result<()> {
    thread::sleep(Duration::from_micros(work_us));
    Ok(())
}

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    println!("=== Loopscope Training Loop Example ===\n");

    let config = ConfigBuilder::new().window(10, 20).build()?;
    let session = ProfilingSession::shared(loopscope::default_sink());
    let window = config.to_window()?;
    let mut controller =
        ProfilingWindowController::with_options(session.clone(), config.window_options());

    println!(
        "Backend: {}, window: iterations {}..{}\n",
        session.sink().name(),
        window.start,
        window.end
    );

    {
        // Closes the capture if the loop bails out inside the window.
        let mut controller = controller.guard();

        for iteration in 0..ITERATIONS {
            controller.advance(iteration, &window)?;

            session.in_event("forward", || simulate(300))?;
            session.in_event("zero_grad", || simulate(20))?;
            session.in_event("backward", || simulate(600))?;

            // Explicit push/pop pairs work too.
            session.push_event("optimizer_step")?;
            simulate(100)?;
            session.pop_event()?;

            if controller.is_active() {
                println!("  iteration {:>2}: profiled", iteration);
            }
        }
    }

    println!(
        "\nWindows opened: {}, capture active: {}",
        controller.windows_opened(),
        controller.is_active()
    );
    Ok(())
}
