use std::{ffi::OsString, path::PathBuf};

use clap::Parser;

use crate::{
    dialer::{EndpointAddress, ProxyType},
    error::ConfigError,
    relay::RelayOptions,
};

/// Connect stdin/stdout to a destination through an HTTP CONNECT or SOCKS5 proxy
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Proxy type: http or socks5
    #[arg(short = 't', long = "type", default_value = "http")]
    proxy_type: String,

    /// Keep reading from the tunnel after stdin is closed
    #[arg(long)]
    half_close: bool,

    /// Log more (repeat for debug and trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    proxy_host: String,
    proxy_port: String,
    dest_host: String,
    dest_port: String,

    /// Proxy credentials file (not supported)
    authfile: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub proxy_type: ProxyType,
    pub proxy: EndpointAddress,
    pub dest: EndpointAddress,
    pub relay: RelayOptions,
    pub verbose: u8,
}

impl Config {
    pub fn from_args<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        Cli::try_parse_from(args)?.try_into()
    }

    /// The default log filter when `RUST_LOG` is unset.
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}

impl TryFrom<Cli> for Config {
    type Error = ConfigError;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        if cli.authfile.is_some() {
            return Err(ConfigError::AuthNotSupported);
        }
        Ok(Config {
            proxy_type: cli.proxy_type.parse()?,
            proxy: EndpointAddress::new(cli.proxy_host, cli.proxy_port),
            dest: EndpointAddress::new(cli.dest_host, cli.dest_port),
            relay: RelayOptions {
                half_close: cli.half_close,
            },
            verbose: cli.verbose,
        })
    }
}
