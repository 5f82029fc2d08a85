mod format;

use anyhow::{anyhow, Result};
use clap::{ArgAction, Parser};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{debug, warn};

use wpan_info::sim::SimKernel;
use wpan_info::{
    config_path, load_optional, BackendRegistry, HostLookup, MetricsHub, QueryError, Resolver,
    SystemHost, WirelessConfig,
};

const USAGE: &str = "Usage:
\tiwpaninfo <device> info
\tiwpaninfo <device> txpowerlist
\tiwpaninfo <device> freqlist
\tiwpaninfo <device> ccaedlvllist
\tiwpaninfo <backend> phyname <section>
";

#[derive(Parser, Debug)]
#[command(
    name = "iwpaninfo",
    version,
    about = "IEEE 802.15.4 device information",
    override_usage = "iwpaninfo [OPTIONS] [<device> <command>... | <backend> phyname <section>]"
)]
struct Cli {
    /// Print JSON instead of text
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,

    /// Query a simulated nl802154 kernel instead of the running one
    #[arg(long, action = ArgAction::SetTrue)]
    mock: bool,

    /// Wireless config (defaults to $IWPANINFO_CONFIG, then /etc/iwpaninfo/wireless.yaml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// sysfs mount point
    #[arg(long, default_value = "/sys")]
    sysfs: PathBuf,

    /// Print Prometheus metrics on exit
    #[arg(long, action = ArgAction::SetTrue)]
    metrics: bool,

    /// Device and commands, or backend, `phyname` and section
    args: Vec<String>,
}

#[derive(Debug, PartialEq, Eq)]
enum Invocation {
    /// Info for every interface some backend recognises.
    Scan,
    Device {
        dev: String,
        commands: Vec<String>,
    },
    PhyName {
        backend: String,
        section: String,
    },
}

impl Invocation {
    /// `None` means the arguments need the usage text.
    fn from_args(args: &[String]) -> Option<Self> {
        match args {
            [] => Some(Invocation::Scan),
            [_] => None,
            [backend, cmd, section] if cmd.starts_with('p') => Some(Invocation::PhyName {
                backend: backend.clone(),
                section: section.clone(),
            }),
            [dev, commands @ ..] => Some(Invocation::Device {
                dev: dev.clone(),
                commands: commands.to_vec(),
            }),
        }
    }
}

#[derive(Serialize)]
struct PhyLookup<'a> {
    backend: &'a str,
    section: &'a str,
    phy: String,
}

struct Session {
    registry: BackendRegistry,
    interfaces: Vec<String>,
    metrics: Option<MetricsHub>,
    json: bool,
}

fn main() -> Result<ExitCode> {
    setup_tracing();
    let cli = Cli::parse();

    let Some(invocation) = Invocation::from_args(&cli.args) else {
        eprint!("{USAGE}");
        return Ok(ExitCode::FAILURE);
    };

    let mut session = Session::open(&cli)?;
    let outcome = session.run(&invocation);
    session.registry.finish();
    if let Some(m) = &session.metrics {
        print!("{}", m.encode_text());
    }
    Ok(if outcome? {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn setup_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();
}

/// A broken config file is reported and otherwise ignored.
fn load_config(explicit: Option<&Path>) -> Option<WirelessConfig> {
    let path = config_path(explicit);
    match load_optional(&path) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!("ignoring wireless config: {e:#}");
            None
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

impl Session {
    fn open(cli: &Cli) -> Result<Self> {
        let config = load_config(cli.config.as_deref());
        let metrics = if cli.metrics {
            Some(MetricsHub::new().map_err(anyhow::Error::msg)?)
        } else {
            None
        };
        let (registry, interfaces) = if cli.mock {
            let sim = SimKernel::demo();
            let interfaces = sim.host().net_interfaces();
            (sim.registry(config, metrics.as_ref()), interfaces)
        } else {
            let host = SystemHost::new(cli.sysfs.clone());
            let interfaces = host.net_interfaces();
            let resolver = Resolver::new(Box::new(host), config);
            (BackendRegistry::discover(resolver, metrics.as_ref()), interfaces)
        };
        debug!(backends = ?registry.names(), interfaces = interfaces.len(), "session ready");
        Ok(Self {
            registry,
            interfaces,
            metrics,
            json: cli.json,
        })
    }

    /// `Ok(false)` when some command was not understood.
    fn run(&mut self, invocation: &Invocation) -> Result<bool> {
        match invocation {
            Invocation::Scan => self.scan().map(|_| true),
            Invocation::Device { dev, commands } => self.device(dev, commands),
            Invocation::PhyName { backend, section } => {
                self.phyname(backend, section).map(|_| true)
            }
        }
    }

    fn scan(&mut self) -> Result<()> {
        let mut infos = Vec::new();
        for dev in &self.interfaces {
            let Some(backend) = self.registry.probe(dev) else {
                continue;
            };
            let info = backend.info(dev);
            if self.json {
                infos.push(info);
            } else {
                println!("{}", format::info(&info));
            }
        }
        if self.json {
            print_json(&infos)?;
        }
        Ok(())
    }

    fn device(&mut self, dev: &str, commands: &[String]) -> Result<bool> {
        let json = self.json;
        let backend = self
            .registry
            .probe(dev)
            .ok_or_else(|| anyhow!("No such wpan device: {dev}"))?;
        let mut ok = true;
        for cmd in commands {
            match cmd.chars().next() {
                Some('i') => {
                    let info = backend.info(dev);
                    if json {
                        print_json(&info)?;
                    } else {
                        print!("{}", format::info(&info));
                    }
                }
                Some('t') => {
                    let list = or_empty(backend.txpower_list(dev));
                    if json {
                        print_json(&list)?;
                    } else {
                        print!("{}", format::txpower_list(&list));
                    }
                }
                Some('f') => {
                    let list = or_empty(backend.frequency_list(dev));
                    if json {
                        print_json(&list)?;
                    } else {
                        let page = backend.page(dev).ok();
                        let channel = backend.channel(dev).ok();
                        print!("{}", format::freq_list(&list, page, channel));
                    }
                }
                Some('c') => {
                    let list = or_empty(backend.cca_ed_level_list(dev));
                    if json {
                        print_json(&list)?;
                    } else {
                        print!("{}", format::cca_ed_level_list(&list));
                    }
                }
                _ => {
                    eprintln!("Unknown command: {cmd}");
                    ok = false;
                }
            }
        }
        Ok(ok)
    }

    fn phyname(&mut self, name: &str, section: &str) -> Result<()> {
        let json = self.json;
        let backend = self
            .registry
            .by_name(name)
            .ok_or_else(|| anyhow!("No such wpan backend: {name}"))?;
        match backend.lookup_phy(section) {
            Ok(phy) if json => print_json(&PhyLookup {
                backend: name,
                section,
                phy,
            })?,
            Ok(phy) => println!("{phy}"),
            Err(QueryError::Unsupported(_)) => eprintln!("Not supported"),
            Err(e) => {
                debug!(section, error = %e, "phy lookup failed");
                eprintln!("802.15.4 phy not found");
            }
        }
        Ok(())
    }
}

/// List failures print the same as an empty list.
fn or_empty<T>(result: Result<Vec<T>, QueryError>) -> Vec<T> {
    result.unwrap_or_else(|e| {
        debug!(error = %e, "list query failed");
        Vec::new()
    })
}
