//! The three ways into a transfer: offer a file, ask for one, or follow a link.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use sendlink_core::link::new_session_id;
use sendlink_core::progress::format_size;
use sendlink_core::protocol::FALLBACK_FILE_NAME;
use sendlink_core::{Direction, FileMetadata, Invite, ShareLink, TransferKey, TransferStateMachine};
use sendlink_net::{FileSource, PeerConnectionError, Signaling, SignalingSession, TransferEngine};
use tempfile::NamedTempFile;
use tokio::fs::File;
use tokio::io::{BufReader, BufWriter};

use crate::config::Config;
use crate::console::{self, ConsoleProgress, Guarded};

/// `sendlink send FILE`: we send, the link tells the other side to receive.
pub async fn send(cfg: &Config, path: &Path) -> anyhow::Result<()> {
    let source = open_source(path).await?;
    let (invite, link) = Invite::create(Direction::Send);
    print_link(cfg, &link);
    let mut session = SignalingSession::new(invite.session_id.clone(), cfg.signaling())
        .with_timeout(cfg.negotiation_timeout());
    negotiate(&mut session, None).await?;
    send_over(cfg, &mut session, &invite.key, source).await
}

/// `sendlink receive`: we receive, the link tells the other side to send.
pub async fn receive(cfg: &Config, out: &Path) -> anyhow::Result<()> {
    ensure_dir(out).await?;
    let (invite, link) = Invite::create(Direction::Receive);
    print_link(cfg, &link);
    let mut session = SignalingSession::new(invite.session_id.clone(), cfg.signaling())
        .with_timeout(cfg.negotiation_timeout());
    negotiate(&mut session, None).await?;
    receive_over(cfg, &mut session, &invite.key, out).await?;
    Ok(())
}

/// `sendlink open LINK [FILE]`: do whatever the link asks of us.
pub async fn open(
    cfg: &Config,
    link: &str,
    file: Option<&Path>,
    out: &Path,
) -> anyhow::Result<()> {
    // The key is imported before anything touches the network.
    let link = ShareLink::parse(link).context("invalid link")?;
    let invite = Invite::accept(&link).context("invalid link")?;
    let mut session = SignalingSession::new(new_session_id(), cfg.signaling())
        .with_timeout(cfg.negotiation_timeout());

    match invite.local_direction {
        Direction::Send => {
            let file = file.context("this link asks you to send a file: sendlink open <LINK> <FILE>")?;
            let source = open_source(file).await?;
            negotiate(&mut session, Some(&invite.session_id)).await?;
            send_over(cfg, &mut session, &invite.key, source).await
        }
        Direction::Receive => {
            if file.is_some() {
                bail!("this link delivers a file to you; run it without a FILE argument");
            }
            ensure_dir(out).await?;
            negotiate(&mut session, Some(&invite.session_id)).await?;
            receive_over(cfg, &mut session, &invite.key, out).await?;
            Ok(())
        }
    }
}

fn print_link(cfg: &Config, link: &ShareLink) {
    eprintln!("Share this link with the other person (it contains the key):");
    println!("{}", link.to_url(&cfg.link_base));
    eprintln!("Waiting for them to open it... (Ctrl+C to cancel)");
}

async fn ensure_dir(dir: &Path) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("cannot create {}", dir.display()))
}

async fn open_source(path: &Path) -> anyhow::Result<FileSource<BufReader<File>>> {
    let file = File::open(path)
        .await
        .with_context(|| format!("cannot open {}", path.display()))?;
    let meta = file.metadata().await?;
    if !meta.is_file() {
        bail!("{} is not a regular file", path.display());
    }
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| FALLBACK_FILE_NAME.to_string());
    Ok(FileSource::new(
        FileMetadata::new(name, meta.len()),
        BufReader::new(file),
    ))
}

/// Connect the session; Ctrl+C while waiting closes it.
async fn negotiate<S: Signaling>(
    session: &mut SignalingSession<S>,
    remote: Option<&str>,
) -> Result<(), PeerConnectionError> {
    let handle = session.close_handle();
    let attempt = async {
        match remote {
            None => session.receive_connection().await.map(|_| ()),
            Some(id) => session.connect_to(id).await.map(|_| ()),
        }
    };
    tokio::select! {
        r = attempt => r?,
        _ = tokio::signal::ctrl_c() => {
            handle.close();
            return Err(PeerConnectionError::Closed);
        }
    }
    eprintln!("Connected.");
    Ok(())
}

async fn send_over<S: Signaling>(
    cfg: &Config,
    session: &mut SignalingSession<S>,
    key: &TransferKey,
    source: FileSource<BufReader<File>>,
) -> anyhow::Result<()> {
    let name = source.metadata.name.clone();
    let mut machine = TransferStateMachine::new();
    let mut progress = ConsoleProgress::new();
    let channel = session.channel_mut().ok_or(PeerConnectionError::Closed)?;

    machine.begin();
    let outcome = {
        let mut engine = TransferEngine::new(channel, key).with_options(cfg.transfer_options());
        console::guard(&machine, engine.send_file(source, &mut progress)).await
    };
    session.close();

    let result = match outcome {
        Guarded::Done(r) => r,
        Guarded::Left => {
            machine.fail("left during transfer");
            bail!("transfer aborted");
        }
    };
    machine.record(&result);
    let report = result?;
    eprintln!("Sent {name} ({}).", format_size(report.bytes, false));
    Ok(())
}

/// Receive into a temp file in `dir`; it is renamed into place only once verified.
async fn receive_over<S: Signaling>(
    cfg: &Config,
    session: &mut SignalingSession<S>,
    key: &TransferKey,
    dir: &Path,
) -> anyhow::Result<PathBuf> {
    let tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("cannot write to {}", dir.display()))?;
    let mut sink = BufWriter::new(File::from_std(tmp.as_file().try_clone()?));
    let mut machine = TransferStateMachine::new();
    let mut progress = ConsoleProgress::new();
    let channel = session.channel_mut().ok_or(PeerConnectionError::Closed)?;

    machine.begin();
    let outcome = {
        let mut engine = TransferEngine::new(channel, key).with_options(cfg.transfer_options());
        console::guard(&machine, engine.recv_file(&mut sink, &mut progress)).await
    };
    session.close();
    drop(sink);

    let result = match outcome {
        Guarded::Done(r) => r,
        Guarded::Left => {
            machine.fail("left during transfer");
            bail!("transfer aborted");
        }
    };
    machine.record(&result);
    let report = result?;

    let dest = unique_destination(dir, &report.metadata.sanitized_name());
    tmp.persist_noclobber(&dest)
        .with_context(|| format!("cannot save {}", dest.display()))?;
    eprintln!(
        "Saved {} ({}).",
        dest.display(),
        format_size(report.bytes, false)
    );
    Ok(dest)
}

/// `dir/name`, or `dir/stem (n).ext` for the first n that is free.
fn unique_destination(dir: &Path, name: &str) -> PathBuf {
    let first = dir.join(name);
    if !first.exists() {
        return first;
    }
    let path = Path::new(name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string());
    let ext = path.extension().map(|e| e.to_string_lossy().into_owned());
    (1u32..)
        .map(|n| match &ext {
            Some(ext) => dir.join(format!("{stem} ({n}).{ext}")),
            None => dir.join(format!("{stem} ({n})")),
        })
        .find(|p| !p.exists())
        .unwrap_or(first)
}

#[cfg(test)]
mod tests {
    use sendlink_net::MemoryRendezvous;

    use super::*;

    #[test]
    fn destination_avoids_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(unique_destination(dir.path(), "a.txt"), dir.path().join("a.txt"));
        std::fs::write(dir.path().join("a.txt"), b"x").unwrap();
        std::fs::write(dir.path().join("a (1).txt"), b"x").unwrap();
        assert_eq!(
            unique_destination(dir.path(), "a.txt"),
            dir.path().join("a (2).txt")
        );
        std::fs::write(dir.path().join("README"), b"x").unwrap();
        assert_eq!(
            unique_destination(dir.path(), "README"),
            dir.path().join("README (1)")
        );
    }

    #[tokio::test]
    async fn source_uses_file_name_and_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.md");
        std::fs::write(&path, b"# hi\n").unwrap();
        let source = open_source(&path).await.unwrap();
        assert_eq!(source.metadata, FileMetadata::new("notes.md", 5));
        assert!(open_source(dir.path()).await.is_err());
        assert!(open_source(&dir.path().join("missing")).await.is_err());
    }

    #[tokio::test]
    async fn file_lands_on_disk_under_its_name() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let path = src.path().join("hello.txt");
        std::fs::write(&path, b"hello over the link").unwrap();
        std::fs::write(out.path().join("hello.txt"), b"older").unwrap();

        let cfg = Config::default();
        let key = TransferKey::generate();
        let rendezvous = MemoryRendezvous::new();
        let mut initiator = SignalingSession::new("s", rendezvous.clone());
        let mut responder = SignalingSession::new("r", rendezvous);
        let source = open_source(&path).await.unwrap();

        let (sent, saved) = tokio::join!(
            async {
                negotiate(&mut initiator, None).await?;
                send_over(&cfg, &mut initiator, &key, source).await
            },
            async {
                tokio::task::yield_now().await;
                negotiate(&mut responder, Some("s")).await?;
                receive_over(&cfg, &mut responder, &key, out.path()).await
            }
        );
        sent.unwrap();
        let saved = saved.unwrap();
        assert_eq!(saved, out.path().join("hello (1).txt"));
        assert_eq!(std::fs::read(&saved).unwrap(), b"hello over the link");
        // Only the two real files remain; the temp file was renamed, not copied.
        assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 2);
    }
}
