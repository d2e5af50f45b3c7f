//! `glimpse doctor`: Diagnose configuration and connectivity.

use std::path::Path;
use std::time::Duration;

use glimpse_config::AppConfig;
use glimpse_providers::router::build_from_selection;
use glimpse_render::terminal_width;

const HEALTH_TIMEOUT: Duration = Duration::from_secs(15);

pub async fn run(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    println!("🩺 Glimpse Doctor — System Diagnostics");
    println!("======================================\n");

    let mut issues = 0;

    let default_path = AppConfig::config_dir().join("config.toml");
    let shown = config_path.unwrap_or(&default_path);
    if shown.exists() {
        println!("  ✅ Config file found at {}", shown.display());
    } else {
        println!("  ℹ️  No config file at {} (defaults in use)", shown.display());
    }

    let config = match super::chat::load_config(config_path) {
        Ok(config) => {
            println!("  ✅ Configuration valid");
            config
        }
        Err(e) => {
            println!("  ❌ Configuration invalid: {e}");
            println!("\n  ⚠️  1 issue found. Fix the configuration and run doctor again.");
            return Ok(());
        }
    };

    match config.select_provider() {
        Ok(selection) => {
            println!(
                "  ✅ Provider: {} (model {}, vision {})",
                selection.kind.name(),
                selection.model,
                selection.vision_model
            );
            let provider = build_from_selection(&selection);
            match tokio::time::timeout(HEALTH_TIMEOUT, provider.health_check()).await {
                Ok(Ok(true)) => println!("  ✅ Provider reachable"),
                Ok(Ok(false)) => {
                    println!("  ⚠️  Provider answered but reported a problem");
                    issues += 1;
                }
                Ok(Err(e)) => {
                    println!("  ❌ Provider unreachable: {e}");
                    issues += 1;
                }
                Err(_) => {
                    println!("  ❌ Provider did not answer within {}s", HEALTH_TIMEOUT.as_secs());
                    issues += 1;
                }
            }
        }
        Err(e) => {
            println!("  ❌ {e}");
            issues += 1;
        }
    }

    if config.has_search_key() {
        println!("  ✅ Search configured ({})", config.search.api_url);
    } else {
        println!("  ⚠️  No VALYU_API_KEY — web and image search disabled");
        issues += 1;
    }

    for (label, dir) in [
        ("Log directory", config.log_path().parent().map(Path::to_path_buf)),
        ("Images directory", Some(config.images_dir())),
    ] {
        match dir {
            Some(dir) if writable(&dir) => println!("  ✅ {label} writable: {}", dir.display()),
            Some(dir) => {
                println!("  ❌ {label} not writable: {}", dir.display());
                issues += 1;
            }
            None => {}
        }
    }

    println!("  ✅ Terminal width: {} columns", terminal_width());

    println!();
    if issues == 0 {
        println!("  🎉 All checks passed!");
    } else {
        println!("  ⚠️  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}

/// Whether `dir` exists (or can be created) and accepts a file.
fn writable(dir: &Path) -> bool {
    if std::fs::create_dir_all(dir).is_err() {
        return false;
    }
    let probe = dir.join(".glimpse-doctor");
    let ok = std::fs::write(&probe, b"ok").is_ok();
    let _ = std::fs::remove_file(&probe);
    ok
}
