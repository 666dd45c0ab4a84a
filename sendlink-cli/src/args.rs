//! Command-line parsing.

use std::net::SocketAddr;
use std::path::PathBuf;

pub const USAGE: &str = "\
usage:
  sendlink send <FILE>                      create a link that delivers FILE
  sendlink receive [--out DIR]              create a link the other side sends a file through
  sendlink open <LINK> [FILE] [--out DIR]   join a transfer from a link
  sendlink rendezvous [--bind ADDR]         run the rendezvous service
  sendlink --version | --help";

/// Default bind address for `sendlink rendezvous`.
pub const DEFAULT_RENDEZVOUS_BIND: &str = "0.0.0.0:45700";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Send { file: PathBuf },
    Receive { out: Option<PathBuf> },
    Open {
        link: String,
        file: Option<PathBuf>,
        out: Option<PathBuf>,
    },
    Rendezvous { bind: SocketAddr },
    Version,
    Help,
}

pub fn parse<I>(args: I) -> Result<Command, String>
where
    I: IntoIterator<Item = String>,
{
    let mut positional = Vec::new();
    let mut out = None;
    let mut bind = None;
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => return Ok(Command::Version),
            "--help" | "-h" => return Ok(Command::Help),
            "--out" | "-o" => {
                out = Some(PathBuf::from(args.next().ok_or("--out needs a directory")?));
            }
            "--bind" => {
                let addr = args.next().ok_or("--bind needs an address")?;
                bind = Some(
                    addr.parse::<SocketAddr>()
                        .map_err(|e| format!("bad --bind address {addr:?}: {e}"))?,
                );
            }
            flag if flag.starts_with("--") => return Err(format!("unknown option {flag}")),
            _ => positional.push(arg),
        }
    }

    let mut positional = positional.into_iter();
    let command = match positional.next().as_deref() {
        Some("send") => Command::Send {
            file: PathBuf::from(positional.next().ok_or("send needs a file")?),
        },
        Some("receive") => Command::Receive { out },
        Some("open") => Command::Open {
            link: positional.next().ok_or("open needs a link")?,
            file: positional.next().map(PathBuf::from),
            out,
        },
        Some("rendezvous") => Command::Rendezvous {
            bind: match bind {
                Some(b) => b,
                None => DEFAULT_RENDEZVOUS_BIND
                    .parse()
                    .map_err(|e| format!("bad default bind address: {e}"))?,
            },
        },
        Some(other) => return Err(format!("unknown command {other}")),
        None => return Ok(Command::Help),
    };
    if let Some(extra) = positional.next() {
        return Err(format!("unexpected argument {extra}"));
    }
    Ok(command)
}
