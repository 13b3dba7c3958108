use std::error::Error;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use paramstore::{
    LocationDescriptor, ParamDelta, ParameterSet, QueryStatement, QueryTemplate, ViewConfig,
};

#[derive(Parser, Debug)]
#[clap(name = "paramstore", about, version)]
struct Args {
    /// Increase output logging verbosity.
    #[clap(short, long)]
    verbose: bool,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Bind a query template against the parameters in a location.
    Bind {
        /// View configuration file (JSON or YAML). Defaults to the explorer
        /// view.
        #[clap(long)]
        view: Option<PathBuf>,
        /// The location descriptor (query string) to load parameters from.
        #[clap(short, long, default_value = "")]
        location: String,
        /// Query text with ${key} placeholders.
        template: String,
    },
    /// Change a field and print the resulting location.
    Change {
        #[clap(long)]
        view: Option<PathBuf>,
        #[clap(short, long, default_value = "")]
        location: String,
        /// The field being changed. Its declared clear policy is applied.
        #[clap(short, long)]
        field: Option<String>,
        /// Parameters to remove.
        #[clap(long)]
        unset: Vec<String>,
        /// Parameters to set, in key=value form.
        params: Vec<String>,
    },
    /// Validate a view configuration file.
    Check {
        #[clap(long)]
        view: PathBuf,
    },
    /// Print the explorer statement for the parameters in a location.
    Explore {
        #[clap(short, long, default_value = "")]
        location: String,
    },
}

fn main() {
    let args = Args::parse();
    simple_logger::init_with_level(if args.verbose {
        log::Level::Debug
    } else {
        log::Level::Info
    })
    .unwrap();

    if let Err(e) = run(args.command) {
        log::error!("Failed: {}", e);
        std::process::exit(1);
    }
}

fn run(command: Command) -> Result<(), Box<dyn Error>> {
    match command {
        Command::Bind {
            view,
            location,
            template,
        } => {
            let config = load_view(view)?;
            let mut store = config.store();
            report_rejected(store.load_from_location(&location));
            println!("{}", store.bind_query(&QueryTemplate::from(template)));
        }
        Command::Change {
            view,
            location,
            field,
            unset,
            params,
        } => {
            let config = load_view(view)?;
            let mut store = config.store();
            report_rejected(store.load_from_location(&location));
            let mut delta = ParamDelta::new();
            for param in params {
                let (key, value) = param
                    .split_once('=')
                    .ok_or_else(|| format!("expected key=value, but got \"{}\"", param))?;
                delta = delta.set(key, value);
            }
            for key in unset {
                delta = delta.unset(key);
            }
            let policy = match field {
                Some(f) => config.fields.policy(f),
                None => Default::default(),
            };
            store.change_params(delta, &policy);
            println!("{}", store.location());
        }
        Command::Check { view } => {
            let config = ViewConfig::load_from_file(&view)?;
            for field in config.fields.fields() {
                let policy = config.fields.policy(field);
                log::info!(
                    "{}: clears [{}]",
                    field,
                    policy.clear.into_iter().collect::<Vec<String>>().join(", ")
                );
            }
            log::info!("View \"{}\" is valid", config.name);
        }
        Command::Explore { location } => {
            let config = ViewConfig::explore()?;
            let mut store = config.store();
            report_rejected(store.load_from_location(&location));
            let params = store.params();
            let sql = store.bind_query(&QueryTemplate::Statement(QueryStatement::default()));
            if sql.is_empty() {
                log::info!("Select a metric and at least one field to build a statement");
            } else {
                println!("{}", sql);
                if params.flag("show") {
                    // Link to the same statement in the query search view.
                    let search = ParameterSet::new()
                        .with("db", params.get("db").unwrap_or_default())
                        .with("sql", &sql);
                    println!("/search?{}", LocationDescriptor::from_params(&search));
                }
            }
        }
    }
    Ok(())
}

fn load_view(view: Option<PathBuf>) -> Result<ViewConfig, Box<dyn Error>> {
    Ok(match view {
        Some(path) => ViewConfig::load_from_file(path)?,
        None => ViewConfig::explore()?,
    })
}

fn report_rejected(rejected: Vec<paramstore::Error>) {
    for e in rejected {
        log::warn!("Ignored part of location: {}", e);
    }
}
