pub mod accounting;
pub mod config;
pub mod device;
pub mod error;
pub mod format;
pub mod shm;
pub mod stream;
pub mod thread;

#[cfg(target_os = "linux")]
use std::sync::mpsc::{channel, Sender};
#[cfg(target_os = "linux")]
use std::thread::JoinHandle;

#[cfg(target_os = "linux")]
use device::alsa::AlsaDevice;
#[cfg(target_os = "linux")]
use thread::{Ack, AudioThread, Command};

/// Spawns the realtime mixing thread and returns a handle for posting
/// commands to it plus the join handle for the thread itself. Mirrors the
/// ALSA backend's own open/configure story, generalized over the `Device`
/// trait so a future non-ALSA backend only needs a new `device` module.
#[cfg(target_os = "linux")]
pub fn init() -> std::io::Result<(Sender<Command>, std::sync::mpsc::Receiver<Ack>, JoinHandle<()>)> {
    let config = config::EngineConfig::from_env();
    let (cmd_tx, cmd_rx) = channel::<Command>();
    let (ack_tx, ack_rx) = channel::<Ack>();

    let audio_thread = AudioThread::<AlsaDevice>::new(cmd_rx, ack_tx).map_err(std::io::Error::other)?;
    let handle = std::thread::Builder::new()
        .name("rtmixer-audio".into())
        .spawn(move || audio_thread.run(&config))?;

    Ok((cmd_tx, ack_rx, handle))
}
