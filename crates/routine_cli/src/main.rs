use clap::{CommandFactory, Parser};
use routine_cli::cli::{Cli, Command, ListCommand, build_config_overrides};
use routine_cli::output;
use routine_core::clock::{Clock, SystemClock};
use routine_core::config::{Config, apply_overrides, load_config_with_fallback};
use routine_core::error::AppError;
use routine_core::external::{ExternalTaskService, service_from_config};
use routine_core::model::{NewRoutine, RoutinePatch};
use routine_core::orchestrator::{Orchestrator, OrchestratorSettings};
use routine_core::routine_api::{self, TaskFilter};
use routine_core::storage::{JsonStore, RoutineStore};
use std::io::{self, BufRead};
use std::sync::Arc;
use tokio::runtime::Runtime;
use tracing_subscriber::EnvFilter;

fn init_logging(level: &str, verbose: bool) {
    let default = if verbose { "debug" } else { level };
    // stdout carries command output; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_writer(io::stderr)
        .with_target(false)
        .try_init()
        .ok();
}

fn resolve_config(raw_overrides: &[String]) -> Result<Config, AppError> {
    let loaded = load_config_with_fallback();
    if let Some(err) = loaded.error {
        tracing::warn!(error = %err, "config could not be loaded; using defaults");
    }
    let overrides = build_config_overrides(raw_overrides).map_err(AppError::invalid_input)?;
    apply_overrides(&loaded.config, &overrides)
}

fn external_service(config: &Config) -> Result<Arc<dyn ExternalTaskService>, AppError> {
    Ok(Arc::from(service_from_config(config)?))
}

fn normalize_parse_error(err: clap::Error) -> AppError {
    let rendered = err.to_string();
    let first_line = rendered.lines().next().unwrap_or("invalid command").trim();
    let message = first_line
        .strip_prefix("error: ")
        .unwrap_or(first_line)
        .to_string();
    AppError::invalid_input(message)
}

fn split_command_line(line: &str) -> Result<Vec<String>, AppError> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut escape = false;

    for ch in line.chars() {
        if escape {
            if ch != '"' && ch != '\\' {
                current.push('\\');
            }
            current.push(ch);
            escape = false;
            continue;
        }

        if in_quotes && ch == '\\' {
            escape = true;
            continue;
        }

        if ch == '"' {
            in_quotes = !in_quotes;
            continue;
        }

        if ch.is_whitespace() && !in_quotes {
            if !current.is_empty() {
                args.push(std::mem::take(&mut current));
            }
            continue;
        }

        current.push(ch);
    }

    if in_quotes {
        return Err(AppError::invalid_input("unterminated quote in command"));
    }

    if !current.is_empty() {
        args.push(current);
    }

    Ok(args)
}

fn print_help() {
    let mut cmd = Cli::command();
    let help = cmd.render_help();
    println!("{help}");
}

fn clearable<T>(value: Option<T>, clear: bool) -> Option<Option<T>> {
    if clear { Some(None) } else { value.map(Some) }
}

fn run_command(cli: Cli, runtime: &Runtime) -> Result<(), AppError> {
    let config = resolve_config(&cli.config_override)?;
    let store: Arc<dyn RoutineStore> = Arc::new(JsonStore::from_env()?);
    let clock = Arc::new(SystemClock);
    let now = clock.now_millis();
    let offset = config.utc_offset_minutes;

    match cli.command {
        Command::Add {
            name,
            frequency,
            duration,
            time_of_day,
            ideal_day,
            description,
            category,
            project,
            labels,
            priority,
        } => {
            let name = match name {
                Some(value) if !value.trim().is_empty() => value,
                _ => return Err(AppError::invalid_input("name is required")),
            };

            let mut new = NewRoutine::new(name, frequency);
            new.duration = duration;
            new.time_of_day = time_of_day;
            new.ideal_day = ideal_day;
            new.description = description;
            new.category = category;
            new.project_id = project;
            new.labels = labels;
            new.priority = priority;

            let routine = routine_api::create_routine(store.as_ref(), new, now)?;
            if cli.json {
                output::print_json(&routine)?;
            } else {
                println!("Added routine: {} ({})", routine.name, routine.id);
            }
        }
        Command::Edit {
            id,
            name,
            frequency,
            duration,
            time_of_day,
            clear_time_of_day,
            ideal_day,
            clear_ideal_day,
            description,
            category,
            project,
            labels,
            priority,
        } => {
            let patch = RoutinePatch {
                name,
                description: description.map(Some),
                category: category.map(Some),
                frequency,
                duration,
                time_of_day: clearable(time_of_day, clear_time_of_day),
                ideal_day: clearable(ideal_day, clear_ideal_day),
                project_id: project.map(Some),
                labels: (!labels.is_empty()).then_some(labels),
                priority,
            };

            let routine = routine_api::update_routine(store.as_ref(), &id, patch, now)?;
            if cli.json {
                output::print_json(&routine)?;
            } else {
                println!("Updated routine: {} ({})", routine.name, routine.id);
            }
        }
        Command::Delete { id } => {
            let service = external_service(&config)?;
            let outcome = runtime.block_on(routine_api::delete_routine(
                store.as_ref(),
                service.as_ref(),
                &id,
                now,
            ))?;
            if cli.json {
                output::print_json(&serde_json::json!({
                    "routine": outcome.routine,
                    "skipped": outcome.skipped,
                    "external_closed": outcome.external_closed,
                    "external_close_failures": outcome.external_close_failures,
                }))?;
            } else {
                println!(
                    "Deleted routine: {} ({}), skipped {} pending task(s)",
                    outcome.routine.name,
                    outcome.routine.id,
                    outcome.skipped.len()
                );
            }
        }
        Command::Defer { id } => {
            let routine = routine_api::defer_routine(store.as_ref(), &id, now)?;
            if cli.json {
                output::print_json(&routine)?;
            } else {
                println!("Deferred routine: {} ({})", routine.name, routine.id);
            }
        }
        Command::Undefer { id } => {
            let routine = routine_api::undefer_routine(store.as_ref(), &id, now)?;
            if cli.json {
                output::print_json(&routine)?;
            } else {
                println!("Resumed routine: {} ({})", routine.name, routine.id);
            }
        }
        Command::Show { id } => {
            let routine = routine_api::get_routine(store.as_ref(), &id)?;
            let filter = TaskFilter {
                routine_id: Some(routine.id.clone()),
                status: None,
            };
            let tasks = routine_api::list_tasks(store.as_ref(), &filter)?;
            if cli.json {
                output::print_json(&serde_json::json!({
                    "routine": routine,
                    "tasks": tasks,
                }))?;
            } else {
                println!("{}", output::routine_details(&routine, offset));
                println!("{}", output::tasks_table(&tasks));
            }
        }
        Command::Skip { id } => {
            let service = external_service(&config)?;
            let outcome = runtime.block_on(routine_api::skip_task(
                store.as_ref(),
                service.as_ref(),
                &id,
                now,
            ))?;
            if cli.json {
                output::print_json(&serde_json::json!({
                    "task": outcome.task,
                    "external_closed": outcome.external_closed,
                }))?;
            } else {
                println!("Skipped task: {}", outcome.task.id);
            }
        }
        Command::Done { id, external } => {
            let task = if external {
                routine_api::complete_external_task(store.as_ref(), &id, now)?
            } else {
                routine_api::complete_task(store.as_ref(), &id, now)?
            };
            if cli.json {
                output::print_json(&task)?;
            } else {
                println!("Completed task: {}", task.id);
            }
        }
        Command::Run => {
            let orchestrator = Orchestrator::new(
                store,
                external_service(&config)?,
                clock,
                OrchestratorSettings::from_config(&config),
            );
            let summary = runtime.block_on(orchestrator.run_cycle());
            if cli.json {
                output::print_json(&summary)?;
            } else {
                println!("{}", output::cycle_summary(&summary));
            }
        }
        Command::Daemon { interval_secs } => {
            let interval = interval_secs.unwrap_or(config.interval_secs);
            if interval == 0 {
                return Err(AppError::invalid_input("interval must be positive"));
            }
            let orchestrator = Orchestrator::new(
                store,
                external_service(&config)?,
                clock,
                OrchestratorSettings::from_config(&config),
            );
            tracing::info!(interval_secs = interval, "routine daemon started");
            runtime.block_on(async {
                tokio::select! {
                    _ = orchestrator.run_forever(std::time::Duration::from_secs(interval)) => {}
                    _ = tokio::signal::ctrl_c() => {
                        tracing::info!("routine daemon stopped");
                    }
                }
            });
        }
        Command::List { list } => match list {
            ListCommand::Routines => {
                let routines = routine_api::list_routines(store.as_ref())?;
                if cli.json {
                    output::print_json(&routines)?;
                } else {
                    println!("{}", output::routines_table(&routines));
                }
            }
            ListCommand::Tasks { routine, status } => {
                let filter = TaskFilter {
                    routine_id: routine,
                    status,
                };
                let tasks = routine_api::list_tasks(store.as_ref(), &filter)?;
                if cli.json {
                    output::print_json(&tasks)?;
                } else {
                    println!("{}", output::tasks_table(&tasks));
                }
            }
        },
    }

    Ok(())
}

fn run_interactive(runtime: &Runtime) -> Result<(), AppError> {
    let mut input = String::new();
    let stdin = io::stdin();
    let mut stdin_lock = stdin.lock();

    loop {
        input.clear();
        let bytes = stdin_lock
            .read_line(&mut input)
            .map_err(|err| AppError::io(err.to_string()))?;

        if bytes == 0 {
            break;
        }

        let line = input.trim();
        if line.is_empty() {
            continue;
        }

        if line.eq_ignore_ascii_case("exit") || line.eq_ignore_ascii_case("quit") {
            break;
        }

        if line == "help" || line == "?" {
            print_help();
            continue;
        }

        let args = match split_command_line(line) {
            Ok(args) => args,
            Err(err) => {
                eprintln!("ERROR: {}", err);
                continue;
            }
        };

        if args.is_empty() {
            continue;
        }

        let mut argv = Vec::with_capacity(args.len() + 1);
        argv.push("routines".to_string());
        argv.extend(args);

        let cli = match Cli::try_parse_from(argv) {
            Ok(cli) => cli,
            Err(err) => {
                eprintln!("ERROR: {}", normalize_parse_error(err));
                continue;
            }
        };

        if let Err(err) = run_command(cli, runtime) {
            eprintln!("ERROR: {}", err);
        }
    }

    Ok(())
}

fn build_runtime() -> Result<Runtime, AppError> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::io(err.to_string()))
}

fn exit_with(err: AppError) -> ! {
    eprintln!("ERROR: {}", err);
    std::process::exit(1);
}

fn main() {
    let mut args = std::env::args_os();
    args.next();
    let interactive = args.next().is_none();

    let cli = if interactive {
        None
    } else {
        match Cli::try_parse() {
            Ok(cli) => Some(cli),
            Err(err) => exit_with(normalize_parse_error(err)),
        }
    };

    let mut config = load_config_with_fallback().config;
    if let Some(cli) = cli.as_ref()
        && let Ok(overrides) = build_config_overrides(&cli.config_override)
        && let Ok(merged) = apply_overrides(&config, &overrides)
    {
        config = merged;
    }
    init_logging(config.log_level(), cli.as_ref().is_some_and(|cli| cli.verbose));

    let runtime = build_runtime().unwrap_or_else(|err| exit_with(err));

    let result = match cli {
        Some(cli) => run_command(cli, &runtime),
        None => run_interactive(&runtime),
    };
    if let Err(err) = result {
        exit_with(err);
    }
}
