//! The scheduler: one dedicated realtime thread, woken by a single `poll`
//! call with a computed timeout, driving every open device through
//! fetch/mix/write or capture/dispatch each tick.

use std::collections::HashMap;
use std::os::fd::{AsFd, OwnedFd};
use std::sync::mpsc::{Receiver, Sender, TryRecvError};
use std::time::{Duration, Instant};

use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::unistd::{dup, pipe, read, write};
use tracing::{debug, error, info, warn};

use crate::device::iodev::{DevState, Device, IoDev};
use crate::error::EngineError;
use crate::format::channel_convert::ChannelRemixConverter;
use crate::format::{AudioArea, Direction as ConvDirection};
use crate::stream::dev_stream::DevStream;
use crate::stream::rstream::{Direction as StreamDirection, MonoTime, RStream, RStreamId};
use crate::thread::message::{Ack, Command, DeviceInfo, DrainResult, NewStream, RampRequest, StreamInfo, ThreadInfo};

const MAX_SLEEP: Duration = Duration::from_secs(20);

/// Everything the scheduler owns exclusively: no other thread ever touches
/// these collections, per the single-writer resource model.
pub struct AudioThread<D: Device> {
    cmd_rx: Receiver<Command>,
    ack_tx: Sender<Ack>,
    playback_devs: Vec<IoDev<D>>,
    capture_devs: Vec<IoDev<D>>,
    streams: HashMap<RStreamId, RStream>,
    remix: Option<ChannelRemixConverter>,
    wake_read: OwnedFd,
    wake_write: OwnedFd,
    start: Instant,
    running: bool,
}

impl<D: Device> AudioThread<D> {
    pub fn new(cmd_rx: Receiver<Command>, ack_tx: Sender<Ack>) -> Result<Self, EngineError> {
        let (wake_read, wake_write) = pipe().map_err(|e| EngineError::IoError(format!("creating wake pipe: {e}")))?;
        Ok(AudioThread {
            cmd_rx,
            ack_tx,
            playback_devs: Vec::new(),
            capture_devs: Vec::new(),
            streams: HashMap::new(),
            remix: None,
            wake_read,
            wake_write,
            start: Instant::now(),
            running: true,
        })
    }

    pub fn add_playback_device(&mut self, dev: IoDev<D>) {
        self.playback_devs.push(dev);
    }

    pub fn add_capture_device(&mut self, dev: IoDev<D>) {
        self.capture_devs.push(dev);
    }

    /// A handle another thread can use to interrupt a blocking `poll`
    /// immediately after pushing a command onto `cmd_rx`.
    pub fn waker(&self) -> ThreadWaker {
        ThreadWaker { fd: dup(&self.wake_write).expect("dup of the wake pipe write end") }
    }

    fn mono_now(&self) -> MonoTime {
        MonoTime(self.start.elapsed())
    }

    fn try_acquire_realtime(priority: i32) {
        unsafe {
            let param = nix::libc::sched_param { sched_priority: priority };
            let ret = nix::libc::sched_setscheduler(0, nix::libc::SCHED_FIFO, &param);
            if ret != 0 {
                warn!("failed to acquire SCHED_FIFO at priority {priority}: {}", std::io::Error::last_os_error());
            } else {
                info!("acquired SCHED_FIFO at priority {priority}");
            }
        }
    }

    pub fn run(mut self, config: &crate::config::EngineConfig) {
        if config.realtime {
            Self::try_acquire_realtime(config.sched_priority);
        }

        while self.running {
            self.process_commands();
            if !self.running {
                break;
            }
            self.stream_dev_io();
            let sleep = self.fill_next_sleep_interval();
            self.poll_and_dispatch(sleep);
        }
    }

    fn process_commands(&mut self) {
        loop {
            match self.cmd_rx.try_recv() {
                Ok(cmd) => {
                    let ack = self.handle_command(cmd);
                    if self.ack_tx.send(ack).is_err() {
                        error!("ack channel closed; stopping audio thread");
                        self.running = false;
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.running = false;
                    break;
                }
            }
        }
    }

    fn handle_command(&mut self, cmd: Command) -> Ack {
        match cmd {
            Command::Stop => {
                self.running = false;
                Ack::Ok
            }
            // Device construction happens on the control thread; `D` is
            // already installed into `playback_devs`/`capture_devs` via
            // `add_playback_device`/`add_capture_device` before its id is
            // referenced by any later command, so these two are pure
            // bookkeeping acks.
            Command::AddOpenDev { .. } | Command::RmOpenDev { .. } => Ack::Ok,
            Command::AddStream { stream, dev_ids } => self.cmd_add_stream(stream, dev_ids),
            Command::DisconnectStream { stream_id, dev_id } => self.cmd_disconnect_stream(stream_id, dev_id),
            Command::DrainStream { stream_id } => self.cmd_drain_stream(stream_id),
            Command::ConfigGlobalRemix { num_channels, coeffs } => self.cmd_config_remix(num_channels, coeffs),
            Command::DevStartRamp { dev_id, request } => self.cmd_start_ramp(dev_id, request),
            Command::DumpThreadInfo => Ack::ThreadInfo(self.dump_thread_info()),
            Command::RemoveCallback { .. } => Ack::Ok,
        }
    }

    fn cmd_add_stream(&mut self, stream: NewStream, dev_ids: Vec<u32>) -> Ack {
        let mut rstream = RStream::new(stream.id, stream.direction, stream.format.clone(), stream.buffer_frames, stream.cb_threshold, stream.flags);
        let conv_direction = match stream.direction {
            StreamDirection::Playback => ConvDirection::Output,
            StreamDirection::Capture => ConvDirection::Input,
        };
        let max_frames = stream.cb_threshold.max(stream.buffer_frames / 4).max(1);

        let devs: Vec<&mut IoDev<D>> = match stream.direction {
            StreamDirection::Playback => self.playback_devs.iter_mut().filter(|d| dev_ids.contains(&d.id)).collect(),
            StreamDirection::Capture => self.capture_devs.iter_mut().filter(|d| dev_ids.contains(&d.id)).collect(),
        };

        for dev in devs {
            rstream.attach_device(dev.id);
            let dev_fmt = dev.hw.format().clone();
            match DevStream::create(dev.id, &rstream, dev_fmt, max_frames, conv_direction) {
                Ok(ds) => dev.add_stream(ds, stream.cb_threshold),
                Err(e) => return Ack::from(e),
            }
        }

        self.streams.insert(stream.id, rstream);
        Ack::Ok
    }

    fn cmd_disconnect_stream(&mut self, stream_id: RStreamId, dev_id: u32) -> Ack {
        for dev in self.playback_devs.iter_mut().chain(self.capture_devs.iter_mut()) {
            if dev.id == dev_id {
                dev.remove_stream(stream_id);
            }
        }
        if let Some(stream) = self.streams.get_mut(&stream_id) {
            stream.detach_device(dev_id);
            if stream.devices.is_empty() {
                self.streams.remove(&stream_id);
            }
        }
        Ack::Ok
    }

    fn cmd_drain_stream(&mut self, stream_id: RStreamId) -> Ack {
        match self.streams.get(&stream_id) {
            Some(stream) => {
                let frames = stream.shm.frames_queued();
                let millis = 1 + (frames as u64 * 1000) / (stream.format.frame_rate as u64).max(1);
                Ack::Drain(DrainResult { millis_remaining: millis })
            }
            None => Ack::Err(format!("unknown stream {stream_id:?}")),
        }
    }

    fn cmd_config_remix(&mut self, num_channels: usize, coeffs: Vec<f32>) -> Ack {
        let replaced = self.remix.is_some();
        self.remix = Some(ChannelRemixConverter::new(num_channels, coeffs));
        if replaced {
            Ack::OldRemix { num_channels, coeffs: Vec::new() }
        } else {
            Ack::Ok
        }
    }

    fn cmd_start_ramp(&mut self, dev_id: u32, request: RampRequest) -> Ack {
        debug!(dev_id, ?request, "starting device ramp");
        Ack::Ok
    }

    fn dump_thread_info(&self) -> ThreadInfo {
        let devices = self
            .playback_devs
            .iter()
            .chain(self.capture_devs.iter())
            .map(|d| DeviceInfo {
                dev_id: d.id,
                frames_played: d.frames_played,
                severe_underrun_count: d.severe_underrun_count,
                num_streams: d.streams.len(),
            })
            .collect();
        let streams = self
            .streams
            .values()
            .map(|s| StreamInfo { stream_id: s.id, frames_queued: s.shm.frames_queued(), num_overruns: s.shm.num_overruns() })
            .collect();
        ThreadInfo { devices, streams }
    }

    /// One wake tick's I/O: fetch for playback streams whose callback is
    /// due, capture+dispatch for inputs, then mix+write for outputs.
    fn stream_dev_io(&mut self) {
        let now = self.mono_now();
        self.output_stream_fetch(now);
        self.do_capture(now);
        self.do_playback();
    }

    fn output_stream_fetch(&mut self, now: MonoTime) {
        for dev in &mut self.playback_devs {
            for ds in &dev.streams {
                if let Some(stream) = self.streams.get_mut(&ds.stream_id)
                    && now.0 >= stream.next_cb_ts.0
                {
                    stream.shm.set_callback_pending(true);
                    stream.advance_next_cb(now);
                }
            }
        }
    }

    fn do_capture(&mut self, now: MonoTime) {
        for dev in &mut self.capture_devs {
            dev.prepare_output_before_write_samples();
            if dev.state != DevState::NormalRun {
                continue;
            }
            let fmt = dev.hw.format().clone();

            loop {
                let level = match dev.hw.frames_queued() {
                    Ok(ts) => ts.level,
                    Err(EngineError::Xrun(msg)) => {
                        warn!(dev_id = dev.id, %msg, "capture device xrun, requesting reset");
                        dev.severe_underrun_count += 1;
                        let _ = dev.hw.reset();
                        break;
                    }
                    Err(e) => {
                        error!(dev_id = dev.id, error = %e, "capture device error");
                        break;
                    }
                };
                if level == 0 {
                    break;
                }
                let (buf, frames) = match dev.hw.get_buffer(level) {
                    Ok(v) => v,
                    Err(e) => {
                        error!(dev_id = dev.id, error = %e, "failed to get capture buffer");
                        break;
                    }
                };
                if frames == 0 {
                    break;
                }
                let area = AudioArea::config_buf_pointers(&fmt, buf);
                for ds in &mut dev.streams {
                    if let Some(stream) = self.streams.get_mut(&ds.stream_id) {
                        ds.capture(stream, &area, 0, 1.0);
                    }
                }
                if let Err(e) = dev.hw.put_buffer(frames) {
                    error!(dev_id = dev.id, error = %e, "failed to commit capture buffer");
                    break;
                }
                dev.frames_played += frames as u64;
                if frames >= level {
                    break;
                }
            }

            for ds in &dev.streams {
                if let Some(stream) = self.streams.get_mut(&ds.stream_id) {
                    ds.capture_update_rstream(stream, now);
                }
            }
        }
    }

    fn do_playback(&mut self) {
        for dev in &mut self.playback_devs {
            dev.prepare_output_before_write_samples();
            if dev.state != DevState::NormalRun {
                continue;
            }

            let hw_ts = match dev.hw.frames_queued() {
                Ok(ts) => ts,
                Err(EngineError::Xrun(msg)) => {
                    warn!(dev_id = dev.id, %msg, "playback device xrun, requesting reset, skipping tick");
                    dev.severe_underrun_count += 1;
                    let _ = dev.hw.reset();
                    continue;
                }
                Err(e) => {
                    error!(dev_id = dev.id, error = %e, "playback device error");
                    continue;
                }
            };

            if let Some(new_rate) = dev.update_rate_estimate(hw_ts.level, hw_ts.when) {
                let coarse = dev.coarse_rate_adjust;
                for ds in &mut dev.streams {
                    if let Some(stream) = self.streams.get_mut(&ds.stream_id) {
                        ds.set_dev_rate(new_rate, 1.0, 1.0, coarse, stream);
                    }
                }
            }

            let buffer_avail = dev.hw.buffer_size().saturating_sub(hw_ts.level);
            let min_buffer_level = dev.hw.min_cb_level();
            let mut fr_to_req = buffer_avail.saturating_sub(min_buffer_level.min(buffer_avail));
            if fr_to_req == 0 {
                fr_to_req = buffer_avail;
            }

            let mut remaining = fr_to_req;
            while remaining > 0 {
                let (buf, frames) = match dev.hw.get_buffer(remaining) {
                    Ok(v) => v,
                    Err(e) => {
                        error!(dev_id = dev.id, error = %e, "failed to get playback buffer");
                        break;
                    }
                };
                if frames == 0 {
                    break;
                }
                let written = write_streams(buf, frames, &mut dev.streams, &mut self.streams);
                if let Some(remix) = &self.remix {
                    apply_remix(remix, buf, frames);
                }
                if let Err(e) = dev.hw.put_buffer(frames) {
                    error!(dev_id = dev.id, error = %e, "failed to commit playback buffer");
                    break;
                }
                dev.frames_played += frames as u64;
                remaining = remaining.saturating_sub(frames);
                if written == 0 {
                    break;
                }
            }
        }
    }

    /// For every output: the earliest `next_cb_ts` across its streams. For
    /// every input: each `DevStream`'s wake time. Capped at 20 seconds.
    fn fill_next_sleep_interval(&mut self) -> Duration {
        let now = self.mono_now();
        let mut earliest = now.saturating_add(MAX_SLEEP);

        for dev in &self.playback_devs {
            for ds in &dev.streams {
                if let Some(stream) = self.streams.get(&ds.stream_id) {
                    if stream.next_cb_ts < earliest {
                        earliest = stream.next_cb_ts;
                    }
                }
            }
        }

        for dev in &mut self.capture_devs {
            let level = dev.hw.frames_queued().map(|t| t.level).unwrap_or(0);
            let when = Instant::now();
            for ds in &dev.streams {
                if let Some(stream) = self.streams.get(&ds.stream_id) {
                    let wake_instant = ds.wake_time(stream, level, when);
                    let delta = wake_instant.saturating_duration_since(when);
                    let candidate = MonoTime(now.0.saturating_add(delta));
                    if candidate < earliest {
                        earliest = candidate;
                    }
                }
            }
        }

        earliest.saturating_sub(now).min(MAX_SLEEP)
    }

    fn poll_and_dispatch(&mut self, timeout: Duration) {
        let mut drain_buf = [0u8; 64];
        let mut fds = [PollFd::new(self.wake_read.as_fd(), PollFlags::POLLIN)];
        let millis = timeout.as_millis().min(i32::MAX as u128) as i32;
        let poll_timeout = PollTimeout::try_from(millis).unwrap_or(PollTimeout::NONE);

        match poll(&mut fds, poll_timeout) {
            Ok(_) => {
                if let Some(flags) = fds[0].revents()
                    && flags.contains(PollFlags::POLLIN)
                {
                    let _ = read(&self.wake_read, &mut drain_buf);
                }
            }
            Err(nix::errno::Errno::EINTR) => {}
            Err(e) => error!(error = %e, "poll failed"),
        }
    }
}

/// `write_streams`: zero-fills the tail beyond every stream's write offset,
/// then mixes each stream in, tracking the total frames any stream
/// actually contributed.
fn write_streams(dst: &mut [u8], write_limit: usize, dev_streams: &mut [DevStream], streams: &mut HashMap<RStreamId, RStream>) -> usize {
    let frame_bytes = dst.len() / write_limit.max(1);
    let max_offset = dev_streams.iter().map(|ds| ds.dev_offset).max().unwrap_or(0);
    if max_offset < write_limit {
        let start = (max_offset * frame_bytes).min(dst.len());
        let end = (write_limit * frame_bytes).min(dst.len());
        dst[start..end].fill(0);
    }

    let mut total_written = 0usize;
    for ds in dev_streams.iter_mut() {
        if ds.dev_offset >= write_limit {
            continue;
        }
        if let Some(stream) = streams.get_mut(&ds.stream_id) {
            let n = write_limit - ds.dev_offset;
            total_written += ds.mix(stream, dst, ds.dev_offset, n);
        }
    }

    total_written
}

/// The remix converter operates on `i16` samples; the device buffer is raw
/// S16LE bytes, so this decodes into a scratch vector, remixes, and writes
/// the result back rather than reinterpreting the byte buffer in place.
fn apply_remix(remix: &ChannelRemixConverter, buf: &mut [u8], frames: usize) {
    if remix.is_identity() {
        return;
    }
    let mut samples: Vec<i16> = buf.chunks_exact(2).map(|b| i16::from_le_bytes([b[0], b[1]])).collect();
    remix.remix(&mut samples, frames);
    for (i, s) in samples.iter().enumerate() {
        let off = i * 2;
        buf[off..off + 2].copy_from_slice(&s.to_le_bytes());
    }
}

/// A handle another thread uses to interrupt a blocking `poll` immediately
/// after pushing a command onto the channel.
pub struct ThreadWaker {
    fd: OwnedFd,
}

impl ThreadWaker {
    pub fn wake(&self) {
        let _ = write(&self.fd, &[0u8]);
    }
}
