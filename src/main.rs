use std::env;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::{App, Arg, SubCommand};
use log::{debug, info, trace, LevelFilter};

use slipway::conf::SlipwayBinaryConfig;
use slipway::{launch, PipelineResult, TriggerEvent};

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> Result<()> {
    let mut builder = pretty_env_logger::formatted_timed_builder();
    builder.filter_level(LevelFilter::Info);
    if let Ok(filters) = env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }
    builder.init();
    let matches = App::new("slipway")
        .version(VERSION)
        .about("A deployment pipeline for Python web apps")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("Sets a config file")
                .takes_value(true)
                .default_value("slipway.toml"),
        )
        .subcommand(
            SubCommand::with_name("run")
                .about("Runs the pipeline once for a repository (manual dispatch)")
                .arg(
                    Arg::with_name("repository")
                        .value_name("REPO")
                        .help("Repository to deploy; anything git clone accepts")
                        .default_value("."),
                )
                .arg(
                    Arg::with_name("branch")
                        .short("b")
                        .long("branch")
                        .value_name("BRANCH")
                        .help("Branch to deploy")
                        .takes_value(true)
                        .default_value("main"),
                ),
        )
        .subcommand(SubCommand::with_name("watch").about(
            "Runs slipway in polling mode; it will watch predefined repositories \
             and deploy the branches that moved",
        ))
        .get_matches();
    if let Some(matches) = matches.subcommand_matches("run") {
        let repo = matches.value_of("repository").unwrap();
        let branch = matches.value_of("branch").unwrap();
        let result = launch(repo, branch, TriggerEvent::Manual)?;
        report(&result);
        if !result.success() {
            return Err(anyhow!("pipeline failed for {}#{}", repo, branch));
        }
        return Ok(());
    }
    if matches.subcommand_matches("watch").is_some() {
        debug!("found subcommand watch");
        let mut config = read_slipway_config_file(matches.value_of("config").unwrap())?;
        debug!("config: {:#?}", config);
        return watch(&mut config);
    }
    Err(anyhow!("no subcommand given, try slipway --help"))
}

fn report(result: &PipelineResult) {
    for sr in &result.stage_results {
        info!(
            "stage {}: {}",
            sr.stage,
            if sr.success { "ok" } else { "FAILED" }
        );
        for l in &sr.logs {
            debug!("  {}", l);
        }
    }
    match (&result.url, result.success()) {
        (Some(url), true) => info!("run succeeded, site at {}", url),
        _ => info!("run failed"),
    }
}

fn watch(config: &mut SlipwayBinaryConfig) -> Result<()> {
    debug!("watch() called with config {:#?}", config);
    let term = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&term))?;
    let wait_period = Duration::from_secs(config.watch_interval as u64);
    let state_dir = Path::new(&config.state_dir).to_path_buf();
    for r in config.repositories.iter_mut() {
        debug!("updating repo {}", r.name);
        r.init(&state_dir);
    }
    while !term.load(Ordering::Relaxed) {
        for repo in config.repositories.iter_mut() {
            debug!("Checking repo {}", repo.name);
            // fetch and see if there's changes, and on which branches
            let changes = match repo.update_branches() {
                Ok(c) => c,
                Err(e) => {
                    log::error!("could not poll {}: {:#}", repo.name, e);
                    continue;
                }
            };
            if changes.is_empty() {
                continue;
            }
            info!("found changes: {:?}", changes);
            for branch in changes.keys().filter(|k| repo.wants_branch(k)) {
                info!("Detected change in {}#{}!", repo.name, branch);
                let mut res = launch(&repo.uri, branch, TriggerEvent::Push)?;
                res.context.repo_name = String::from(&repo.name);
                res.context.repo_url = String::from(&repo.uri);
                report(&res);
                if let Some(notifiers) = &repo.notifiers {
                    for notifier in notifiers {
                        if let Err(e) = notifier.send(&res) {
                            log::error!("could not notify for {}: {:#}", repo.name, e);
                        }
                    }
                }
            }
            trace!("finished execution, persisting branch values…");
            if let Err(e) = repo.persist(&state_dir) {
                log::error!("could not persist state for {}: {:#}", repo.name, e);
            }
        }
        trace!("Waiting {:?} before next poll", wait_period);
        thread::sleep(wait_period);
    }
    info!("Exiting");
    Ok(())
}

fn read_slipway_config_file(config_file: &str) -> Result<SlipwayBinaryConfig> {
    let mut s = String::new();
    let mut f = File::open(config_file)?;
    f.read_to_string(&mut s)?;
    Ok(toml::from_str(&s)?)
}
