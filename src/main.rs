//! CLI entry point (spec §1 "external collaborators": config-file
//! parsing and the CLI entry point sit outside the core). Wires the
//! config loader, a style registry, the scheduler, the worker pool, and
//! the socket server together; contains no scheduling logic of its own.
//!
//! Mirrors the `if __name__ == "__main__"` block in
//! `original_source/renderd.py`: resolve `$RENDERD_CFG`, load, display
//! the style table, then `start_renderers` + `listener`.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use renderd::config::{RenderdConfig, DEFAULT_CFG_PATH};
use renderd::engine::{EngineFactory, IdentityProjector, Projector, TestEngine};
use renderd::scheduler::Scheduler;
use renderd::style::{StyleDef, StyleRegistry};
use renderd::{server, worker};

fn main() -> ExitCode {
    let cfg_path = std::env::var("RENDERD_CFG").unwrap_or_else(|_| DEFAULT_CFG_PATH.to_string());

    let config = match RenderdConfig::load(Path::new(&cfg_path)) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("[MAIN] failed to load {cfg_path}: {e}");
            return ExitCode::FAILURE;
        }
    };
    config.log_styles();

    let styles = match build_style_registry(&config) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("[MAIN] {e}");
            return ExitCode::FAILURE;
        }
    };

    let scheduler = Arc::new(Scheduler::new(config.request_limit, config.dirty_limit));
    let _workers = worker::spawn_pool(
        config.num_threads,
        Arc::clone(&scheduler),
        Arc::new(styles),
        PathBuf::from(&config.tile_dir),
    );

    let listener = match server::bind(Path::new(&config.socketname)) {
        Ok(l) => l,
        Err(e) => {
            eprintln!("[MAIN] failed to bind {}: {e}", config.socketname);
            return ExitCode::FAILURE;
        }
    };
    eprintln!(
        "[MAIN] listening on {} with {} worker threads",
        config.socketname, config.num_threads
    );

    server::serve(listener, scheduler);
    ExitCode::SUCCESS
}

/// Build the style registry this binary ships with. No real map-rendering
/// engine is wired in (spec §1 "rendering engine" is an external
/// collaborator, out of scope for this crate) — every configured style is
/// bound to the deterministic `TestEngine`/`IdentityProjector` pair so the
/// daemon is runnable end-to-end without one.
fn build_style_registry(config: &RenderdConfig) -> Result<StyleRegistry, renderd::RenderdError> {
    let projector: Arc<dyn Projector> = Arc::new(IdentityProjector);
    let engine_factory: EngineFactory = Arc::new(|| Box::new(TestEngine));

    let defs = config
        .styles
        .iter()
        .map(|s| StyleDef {
            name: s.name.clone(),
            projector: Arc::clone(&projector),
            engine_factory: Arc::clone(&engine_factory),
        })
        .collect();

    StyleRegistry::new(defs)
}
