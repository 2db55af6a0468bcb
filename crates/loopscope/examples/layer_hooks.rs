//! # Layer Hooks Example
//!
//! Attaches per-layer events to a small encoder/decoder model:
//! - Loading profiling settings from TOML
//! - Leaves-only versus all-nodes hook granularity
//! - Unregistering hooks after the profiled window
//!
//! ## Run this example:
//! ```bash
//! cargo run -p loopscope --example layer_hooks
//! ```

use std::sync::Arc;

use loopscope::config::load_config_from_str;
use loopscope::prelude::*;
use tracing_subscriber::EnvFilter;

const CONFIG: &str = r#"
[window]
start = 2
end = 4

[hooks]
granularity = "all_nodes"
"#;

fn build_model() -> Module {
    Module::new("Seq2Seq")
        .with_child(
            Module::new("Encoder")
                .with_child(Module::new("Embedding"))
                .with_child(Module::new("Attention"))
                .with_child(Module::new("FeedForward")),
        )
        .with_child(
            Module::new("Decoder")
                .with_child(Module::new("Attention"))
                .with_child(Module::new("Projection")),
        )
}

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    println!("=== Loopscope Layer Hooks Example ===\n");

    let config = load_config_from_str(CONFIG)?;
    let sink = Arc::new(MemorySink::new());
    let mut profiler = Profiler::new(&config, sink.clone())?;
    let mut model = build_model();

    let registration = profiler
        .instrument(&mut model)
        .ok_or("hooks disabled in config")?;
    println!(
        "Hooked {} of {} modules ({:?}): {:?}\n",
        registration.len(),
        model.len(),
        registration.granularity(),
        registration.identifiers()
    );

    for iteration in 0..6 {
        profiler.step(iteration)?;
        model.forward(&mut |_layer: &str| Ok(()))?;
    }
    profiler.finish()?;

    println!("Events recorded inside the window:");
    for name in sink.pushed_names() {
        println!("  {}", name);
    }
    println!("Max nesting depth: {}", sink.max_depth());

    let removed = registration.unregister(&mut model);
    println!("\nRemoved {} hooks", removed);

    sink.clear();
    model.forward(&mut |_layer: &str| Ok(()))?;
    println!("Events after unregistering: {}", sink.len());

    Ok(())
}
