//! Command-line client for an rbus message bus.

#![allow(
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::missing_docs_in_private_items
)]

mod args;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rbus::{Bus, Creds, CredsMask, ProcFs, StreamTransport, Transport, Value};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rbusctl", version, about = "Talk to services on an rbus message bus")]
struct Cli {
    /// Bus socket path.
    #[arg(long, global = true, env = "RBUS_ADDRESS", default_value = "/run/rbus/socket")]
    address: PathBuf,

    /// Method call timeout in seconds.
    #[arg(long, global = true, default_value_t = 25)]
    timeout: u64,

    /// Print results as JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Call a method and print its reply.
    Call {
        /// Destination service name.
        destination: String,
        /// Object path.
        path: String,
        /// Interface name.
        interface: String,
        /// Method name.
        member: String,
        /// Argument signature.
        #[arg(default_value = "")]
        signature: String,
        /// Arguments, parsed against the signature.
        #[arg(allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Emit a signal.
    Emit {
        /// Object path.
        path: String,
        /// Interface name.
        interface: String,
        /// Signal name.
        member: String,
        /// Argument signature.
        #[arg(default_value = "")]
        signature: String,
        /// Arguments, parsed against the signature.
        #[arg(allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Read a property.
    GetProperty {
        /// Destination service name.
        destination: String,
        /// Object path.
        path: String,
        /// Interface name.
        interface: String,
        /// Property name.
        member: String,
        /// Require the property to have this type.
        #[arg(long = "type")]
        expected: Option<String>,
    },

    /// Write a property.
    SetProperty {
        /// Destination service name.
        destination: String,
        /// Object path.
        path: String,
        /// Interface name.
        interface: String,
        /// Property name.
        member: String,
        /// Property type.
        signature: String,
        /// New value, parsed against the type.
        #[arg(allow_hyphen_values = true, required = true)]
        value: Vec<String>,
    },

    /// Show the credentials of the process serving the bus socket.
    PeerCreds,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("RBUS_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = Cli::parse().dispatch() {
        eprintln!("rbusctl: {e:#}");
        std::process::exit(1);
    }
}

impl Cli {
    fn connect(&self) -> Result<Bus> {
        tracing::debug!(address = %self.address.display(), timeout = self.timeout, "connecting");
        let transport = StreamTransport::connect(&self.address)
            .with_context(|| format!("connecting to {}", self.address.display()))?;
        Ok(Bus::builder()
            .transport(transport)
            .method_timeout(Duration::from_secs(self.timeout.max(1)))
            .build()?)
    }

    fn dispatch(self) -> Result<()> {
        match &self.command {
            Command::Call {
                destination,
                path,
                interface,
                member,
                signature,
                args: argv,
            } => {
                let values = args::parse(signature, argv)?;
                let reply = self.connect()?.call_method(
                    Some(destination.as_str()),
                    path,
                    Some(interface.as_str()),
                    member,
                    signature,
                    &values,
                )?;
                self.print_values(reply.signature(), reply.body())
            }
            Command::Emit {
                path,
                interface,
                member,
                signature,
                args: argv,
            } => {
                let values = args::parse(signature, argv)?;
                self.connect()?
                    .emit_signal(path, interface, member, signature, &values)?;
                Ok(())
            }
            Command::GetProperty {
                destination,
                path,
                interface,
                member,
                expected,
            } => {
                let mut reply = self.connect()?.get_property(
                    Some(destination.as_str()),
                    path,
                    interface,
                    member,
                    expected.as_deref(),
                )?;
                let value = reply.read_value()?;
                self.print_values(&value.signature(), &[value])
            }
            Command::SetProperty {
                destination,
                path,
                interface,
                member,
                signature,
                value,
            } => {
                let mut values = args::parse(signature, value)?;
                let value = values
                    .pop()
                    .filter(|_| values.is_empty())
                    .context("property type must be a single complete type")?;
                self.connect()?.set_property(
                    Some(destination.as_str()),
                    path,
                    interface,
                    member,
                    signature,
                    &value,
                )?;
                Ok(())
            }
            Command::PeerCreds => {
                let transport = StreamTransport::connect(&self.address)
                    .with_context(|| format!("connecting to {}", self.address.display()))?;
                let creds = ProcFs::default().extend(
                    &transport.peer_credentials()?,
                    CredsMask::all() - CredsMask::UNIQUE_NAME,
                )?;
                self.print_creds(&creds)
            }
        }
    }

    fn print_values(&self, signature: &str, values: &[Value]) -> Result<()> {
        if self.json {
            let obj = serde_json::json!({
                "signature": signature,
                "values": values,
            });
            println!("{}", serde_json::to_string_pretty(&obj)?);
            return Ok(());
        }
        let mut line = signature.to_owned();
        for v in values {
            line.push(' ');
            line.push_str(&args::format(v));
        }
        println!("{line}");
        Ok(())
    }

    fn print_creds(&self, creds: &Creds) -> Result<()> {
        if self.json {
            let obj = serde_json::json!({
                "pid": creds.pid(),
                "uid": creds.uid(),
                "gid": creds.gid(),
                "comm": creds.comm(),
                "exe": creds.exe(),
                "cmdline": creds.cmdline(),
                "selinux_context": creds.selinux_context(),
            });
            println!("{}", serde_json::to_string_pretty(&obj)?);
            return Ok(());
        }
        let rows: [(&str, Option<String>); 7] = [
            ("PID", creds.pid().map(|v| v.to_string())),
            ("UID", creds.uid().map(|v| v.to_string())),
            ("GID", creds.gid().map(|v| v.to_string())),
            ("Comm", creds.comm().map(str::to_owned)),
            ("Exe", creds.exe().map(str::to_owned)),
            ("CommandLine", creds.cmdline().map(|a| a.join(" "))),
            ("Label", creds.selinux_context().map(str::to_owned)),
        ];
        for (key, value) in rows {
            if let Some(value) = value {
                println!("{key:<12} {value}");
            }
        }
        Ok(())
    }
}
