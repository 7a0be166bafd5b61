use anyhow::{Result, anyhow};
use pico_args::Arguments;
use std::{env, path::PathBuf};

use crate::config::Config;
use crate::pipeline::{self, RunOptions};
use crate::store::ViolationLog;

pub fn run() -> Result<()> {
    let mut pargs = Arguments::from_env();

    // No args -> general help
    if env::args().len() == 1 {
        print_help();
        return Ok(());
    }

    if pargs.contains("-h") || pargs.contains("--help") {
        print_help();
        return Ok(());
    }

    let config_path: Option<PathBuf> = pargs.opt_value_from_str("--config")?;
    let violations_path: Option<PathBuf> = pargs.opt_value_from_str("--violations")?;
    let quiet = pargs.contains(["-q", "--quiet"]);

    // First free arg is the subcommand
    let subcmd: Option<String> = pargs.opt_free_from_str()?;

    match subcmd.as_deref() {
        Some("help") => {
            let topic: Option<String> = pargs.opt_free_from_str()?;
            if let Some(t) = topic {
                print_subcmd_help(&t);
            } else {
                print_help();
            }
            Ok(())
        }

        Some("run") => {
            let input: Option<PathBuf> = pargs.opt_free_from_str()?;
            reject_leftovers(pargs)?;
            let (cfg, _) = Config::resolve(config_path.as_deref())?;
            let violations_path =
                violations_path.unwrap_or_else(|| cfg.output.violations_path.clone());
            let summary = pipeline::run(
                &cfg,
                RunOptions {
                    input,
                    violations_path,
                    quiet,
                },
            )?;
            if summary.unpersisted > 0 {
                return Err(anyhow!(
                    "{} violation(s) could not be written to the log",
                    summary.unpersisted
                ));
            }
            Ok(())
        }

        Some("check") => {
            reject_leftovers(pargs)?;
            let (cfg, path) = Config::resolve(config_path.as_deref())?;
            let mut summary = cfg.summary();
            summary["path"] = serde_json::json!(path);
            print_json(&summary);
            Ok(())
        }

        Some("violations") => {
            reject_leftovers(pargs)?;
            let path = match violations_path {
                Some(p) => p,
                None => Config::resolve(config_path.as_deref())?.0.output.violations_path,
            };
            let records = ViolationLog::open(path).load()?;
            print_json(&serde_json::json!(records));
            Ok(())
        }

        Some(other) => {
            eprintln!("unknown subcommand: {other}\n");
            print_help();
            Ok(())
        }

        None => {
            print_help();
            Ok(())
        }
    }
}

fn reject_leftovers(pargs: Arguments) -> Result<()> {
    let rest = pargs.finish();
    if !rest.is_empty() {
        return Err(anyhow!("unexpected arguments: {rest:?}"));
    }
    Ok(())
}

fn print_help() {
    println!(
        r#"scoopwatch — hand/ingredient hygiene violations from detector output

USAGE:
  scoopwatch help [command]                 Show general or command-specific help
  scoopwatch run [INPUT|-]                  Process a JSON-lines frame stream
  scoopwatch check                          Validate and print the configuration
  scoopwatch violations                     Print the violation log

OPTIONS:
  --config <path>                           Config file (default ~/.config/scoopwatch/config.toml)
  --violations <path>                       Violation log (default from [output])
  -q, --quiet                               Do not print per-frame reports

INPUT:
  One frame per line:
  {{"frame_id": 12, "detections": [{{"track_id": 3, "class_id": 0, "bbox": [x1, y1, x2, y2]}}]}}

TIPS:
  - Logs go to stderr; set RUST_LOG=debug for per-frame tracing
  - The default config is installed on first run
"#
    );
}

fn print_subcmd_help(cmd: &str) {
    match cmd {
        "run" => println!(
            "usage: scoopwatch run [--config <path>] [--violations <path>] [-q] [INPUT|-]\nReads frames from INPUT (stdin when omitted or '-'), prints one report per frame,\nappends violations to the log. Ctrl-C stops and drops unresolved entries."
        ),
        "check" => println!(
            "usage: scoopwatch check [--config <path>]\nLoads and validates the configuration, prints it as JSON."
        ),
        "violations" => println!(
            "usage: scoopwatch violations [--config <path>] [--violations <path>]\nPrints the recorded violations as a JSON array."
        ),
        _ => {
            eprintln!("unknown command: {cmd}\n");
            print_help();
        }
    }
}

fn print_json(v: &serde_json::Value) {
    println!("{}", serde_json::to_string_pretty(v).unwrap_or_default());
}
