//! ffmpeg capture backend
//!
//! Sharing probes the configured display grabber once; recording runs one
//! ffmpeg process per recording that encodes the stream's live tracks to
//! WebM on stdout. Output is cut into segments on a fixed interval, the
//! same way a browser media recorder delivers timesliced data.

use async_trait::async_trait;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStderr, ChildStdin, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::recorder::{MediaRecorder, RecorderEvent, RecorderFactory, RecorderState};
use super::source::{DisplaySource, MediaStream, MediaTrack, StreamConstraints, TrackKind, TrackSource};
use super::CaptureError;
use crate::config::CaptureConfig;

const READ_BUFFER_SIZE: usize = 64 * 1024;
/// How long ffmpeg gets to finalize the container after `q`
const STOP_GRACE: Duration = Duration::from_secs(10);

/// Pick the ffmpeg encoder for a recording MIME type
fn video_codec_for(mime_type: &str) -> Result<&'static str, CaptureError> {
    let mut parts = mime_type.split(';').map(str::trim);
    let container = parts.next().unwrap_or_default();
    let codecs = parts
        .find_map(|param| param.strip_prefix("codecs="))
        .map(|codecs| codecs.trim_matches('"'));

    match (container, codecs) {
        ("video/webm", Some("vp9")) => Ok("libvpx-vp9"),
        ("video/webm", Some("vp8")) | ("video/webm", None) => Ok("libvpx"),
        _ => Err(CaptureError::UnsupportedMimeType(mime_type.to_string())),
    }
}

fn probe_args(config: &CaptureConfig) -> Vec<String> {
    [
        "-hide_banner",
        "-loglevel",
        "error",
        "-f",
        config.display_format.as_str(),
        "-i",
        config.display_input.as_str(),
        "-frames:v",
        "1",
        "-f",
        "null",
        "-",
    ]
    .iter()
    .map(|arg| arg.to_string())
    .collect()
}

fn recorder_args(tracks: &[MediaTrack], config: &CaptureConfig, video_codec: &str) -> Vec<String> {
    let mut args: Vec<String> = vec!["-hide_banner".into(), "-loglevel".into(), "error".into()];
    let mut maps = Vec::new();
    let mut has_audio = false;

    for (input, track) in tracks.iter().enumerate() {
        let source = track.source();
        args.push("-f".into());
        args.push(source.format.clone());
        match track.kind() {
            TrackKind::Video => {
                args.push("-framerate".into());
                args.push(config.fps.to_string());
                maps.push(format!("{}:v", input));
            }
            TrackKind::Audio => {
                maps.push(format!("{}:a", input));
                has_audio = true;
            }
        }
        args.push("-i".into());
        args.push(source.device.clone());
    }

    for map in maps {
        args.push("-map".into());
        args.push(map);
    }

    let bitrate = format!("{}k", config.video_bitrate_kbps);
    args.extend(
        [
            "-c:v",
            video_codec,
            "-b:v",
            bitrate.as_str(),
            "-deadline",
            "realtime",
            "-cpu-used",
            "8",
        ]
        .iter()
        .map(|arg| arg.to_string()),
    );

    if has_audio {
        args.push("-c:a".into());
        args.push("libopus".into());
    }

    args.extend(["-f", "webm", "pipe:1"].iter().map(|arg| arg.to_string()));
    args
}

fn last_line(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("no output")
        .trim()
        .to_string()
}

/// Display source that grabs the screen through ffmpeg
pub struct FfmpegDisplaySource {
    config: CaptureConfig,
}

impl FfmpegDisplaySource {
    pub fn new(config: CaptureConfig) -> Self {
        Self { config }
    }

    /// Grab a single frame to find out whether the display is reachable
    async fn probe_display(&self) -> Result<(), CaptureError> {
        debug!(
            "Probing display {} ({})",
            self.config.display_input, self.config.display_format
        );

        let output = Command::new(&self.config.ffmpeg_path)
            .args(probe_args(&self.config))
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                CaptureError::Unavailable(format!(
                    "failed to run {}: {}",
                    self.config.ffmpeg_path, e
                ))
            })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(CaptureError::Denied(last_line(&output.stderr)))
        }
    }
}

#[async_trait]
impl DisplaySource for FfmpegDisplaySource {
    async fn acquire(&self, constraints: StreamConstraints) -> Result<MediaStream, CaptureError> {
        self.probe_display().await?;

        let mut tracks = Vec::new();
        if constraints.video {
            tracks.push(MediaTrack::new(
                TrackKind::Video,
                format!("screen {}", self.config.display_input),
                TrackSource::new(&self.config.display_format, &self.config.display_input),
            ));
        }

        if constraints.audio {
            match &self.config.audio_input {
                Some(device) => tracks.push(MediaTrack::new(
                    TrackKind::Audio,
                    format!("audio {}", device),
                    TrackSource::new(&self.config.audio_format, device),
                )),
                None => warn!("No audio input configured; sharing video only"),
            }
        }

        Ok(MediaStream::new(tracks))
    }
}

/// Creates one ffmpeg recorder per recording
pub struct FfmpegRecorderFactory {
    config: CaptureConfig,
}

impl FfmpegRecorderFactory {
    pub fn new(config: CaptureConfig) -> Self {
        Self { config }
    }
}

impl RecorderFactory for FfmpegRecorderFactory {
    fn create(
        &self,
        stream: &MediaStream,
        mime_type: &str,
    ) -> Result<Box<dyn MediaRecorder>, CaptureError> {
        let video_codec = video_codec_for(mime_type)?;
        let tracks: Vec<MediaTrack> = stream.live_tracks().cloned().collect();
        if !tracks.iter().any(|track| track.kind() == TrackKind::Video) {
            return Err(CaptureError::NoLiveTracks);
        }

        Ok(Box::new(FfmpegRecorder {
            program: self.config.ffmpeg_path.clone(),
            args: recorder_args(&tracks, &self.config, video_codec),
            segment_interval: Duration::from_millis(self.config.segment_interval_ms.max(1)),
            stop_grace: STOP_GRACE,
            stdin: None,
            task: None,
            events: None,
            active: Arc::new(AtomicBool::new(false)),
        }))
    }
}

pub struct FfmpegRecorder {
    program: String,
    args: Vec<String>,
    segment_interval: Duration,
    stop_grace: Duration,
    stdin: Option<ChildStdin>,
    task: Option<JoinHandle<()>>,
    events: Option<mpsc::UnboundedSender<RecorderEvent>>,
    active: Arc<AtomicBool>,
}

#[async_trait]
impl MediaRecorder for FfmpegRecorder {
    fn state(&self) -> RecorderState {
        if self.active.load(Ordering::SeqCst) {
            RecorderState::Recording
        } else {
            RecorderState::Inactive
        }
    }

    async fn start(&mut self, events: mpsc::UnboundedSender<RecorderEvent>) -> Result<(), CaptureError> {
        if self.task.is_some() {
            return Err(CaptureError::Recorder("recorder already started".to_string()));
        }

        info!("Starting ffmpeg recorder: {} {}", self.program, self.args.join(" "));
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CaptureError::Recorder("failed to capture ffmpeg stdout".to_string()))?;
        self.stdin = child.stdin.take();
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(log_stderr(stderr));
        }

        self.active.store(true, Ordering::SeqCst);

        let active = self.active.clone();
        let task_events = events.clone();
        let interval = self.segment_interval;
        self.task = Some(tokio::spawn(async move {
            if let Err(e) = pump_segments(stdout, interval, &task_events).await {
                error!("Failed reading recorder output: {}", e);
            }

            match child.wait().await {
                Ok(status) if status.success() => debug!("ffmpeg recorder exited"),
                Ok(status) => warn!("ffmpeg recorder exited with {}", status),
                Err(e) => warn!("Failed to wait for ffmpeg recorder: {}", e),
            }

            active.store(false, Ordering::SeqCst);
            let _ = task_events.send(RecorderEvent::Stopped);
        }));
        self.events = Some(events);

        Ok(())
    }

    async fn stop(&mut self) -> Result<(), CaptureError> {
        let Some(mut task) = self.task.take() else {
            return Ok(());
        };

        if let Some(mut stdin) = self.stdin.take() {
            // `q` asks ffmpeg to finish the file and exit
            if let Err(e) = stdin.write_all(b"q").await {
                warn!("Could not signal ffmpeg to stop: {}", e);
            }
        }

        let joined = match tokio::time::timeout(self.stop_grace, &mut task).await {
            Ok(joined) => joined,
            Err(_) => {
                warn!("ffmpeg did not exit within {:?}; killing it", self.stop_grace);
                task.abort();
                task.await
            }
        };

        // The task only misses its Stopped event if it was cancelled or panicked
        if let Err(e) = joined {
            warn!("Recorder task ended abnormally: {}", e);
            if let Some(events) = &self.events {
                let _ = events.send(RecorderEvent::Stopped);
            }
        }

        self.active.store(false, Ordering::SeqCst);
        self.events = None;
        Ok(())
    }
}

/// Forward `reader` as `Data` segments, one per elapsed interval, plus a
/// final segment with whatever is left at end of stream
async fn pump_segments<R>(
    mut reader: R,
    interval: Duration,
    events: &mpsc::UnboundedSender<RecorderEvent>,
) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    let mut pending = Vec::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        tokio::select! {
            read = reader.read(&mut buf) => {
                let n = read?;
                if n == 0 {
                    break;
                }
                pending.extend_from_slice(&buf[..n]);
            }
            _ = ticker.tick() => {
                if !pending.is_empty() {
                    let _ = events.send(RecorderEvent::Data(std::mem::take(&mut pending)));
                }
            }
        }
    }

    if !pending.is_empty() {
        let _ = events.send(RecorderEvent::Data(pending));
    }
    Ok(())
}

async fn log_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        warn!("ffmpeg: {}", line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::recorder::RECORDING_MIME_TYPE;

    fn config() -> CaptureConfig {
        CaptureConfig {
            display_format: "x11grab".to_string(),
            display_input: ":1.0".to_string(),
            audio_format: "pulse".to_string(),
            audio_input: Some("default".to_string()),
            fps: 24,
            video_bitrate_kbps: 1800,
            ..CaptureConfig::default()
        }
    }

    /// Recorder running `sh -c script` in place of ffmpeg
    #[cfg(unix)]
    fn shell_recorder(script: &str, stop_grace: Duration) -> FfmpegRecorder {
        FfmpegRecorder {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            segment_interval: Duration::from_millis(20),
            stop_grace,
            stdin: None,
            task: None,
            events: None,
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Drain events until every sender is gone; returns the joined data
    /// and the number of `Stopped` events
    async fn drain(mut rx: mpsc::UnboundedReceiver<RecorderEvent>) -> (Vec<u8>, usize) {
        let mut data = Vec::new();
        let mut stopped = 0;
        let drained = tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(event) = rx.recv().await {
                match event {
                    RecorderEvent::Data(bytes) => data.extend(bytes),
                    RecorderEvent::Stopped => stopped += 1,
                }
            }
        })
        .await;
        assert!(drained.is_ok(), "recorder events never closed");
        (data, stopped)
    }

    fn collect(rx: &mut mpsc::UnboundedReceiver<RecorderEvent>) -> Vec<Vec<u8>> {
        let mut segments = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let RecorderEvent::Data(data) = event {
                segments.push(data);
            }
        }
        segments
    }

    #[test]
    fn test_video_codec_for_mime_type() {
        assert_eq!(video_codec_for(RECORDING_MIME_TYPE).unwrap(), "libvpx-vp9");
        assert_eq!(video_codec_for("video/webm;codecs=\"vp8\"").unwrap(), "libvpx");
        assert_eq!(video_codec_for("video/webm").unwrap(), "libvpx");
        assert!(matches!(
            video_codec_for("video/mp4; codecs=avc1"),
            Err(CaptureError::UnsupportedMimeType(_))
        ));
    }

    #[test]
    fn test_probe_grabs_one_frame() {
        let args = probe_args(&config());
        assert_eq!(
            args.join(" "),
            "-hide_banner -loglevel error -f x11grab -i :1.0 -frames:v 1 -f null -"
        );
    }

    #[test]
    fn test_recorder_args_with_audio() {
        let tracks = vec![
            MediaTrack::new(TrackKind::Video, "screen", TrackSource::new("x11grab", ":1.0")),
            MediaTrack::new(TrackKind::Audio, "audio", TrackSource::new("pulse", "default")),
        ];
        let args = recorder_args(&tracks, &config(), "libvpx-vp9").join(" ");

        assert!(args.starts_with(
            "-hide_banner -loglevel error -f x11grab -framerate 24 -i :1.0 -f pulse -i default"
        ));
        assert!(args.contains("-map 0:v -map 1:a"));
        assert!(args.contains("-c:v libvpx-vp9 -b:v 1800k"));
        assert!(args.contains("-c:a libopus"));
        assert!(args.ends_with("-f webm pipe:1"));
    }

    #[test]
    fn test_recorder_args_video_only() {
        let tracks = vec![MediaTrack::new(
            TrackKind::Video,
            "screen",
            TrackSource::new("gdigrab", "desktop"),
        )];
        let args = recorder_args(&tracks, &config(), "libvpx").join(" ");

        assert!(args.contains("-f gdigrab -framerate 24 -i desktop"));
        assert!(args.contains("-map 0:v"));
        assert!(!args.contains("-c:a"));
    }

    #[test]
    fn test_factory_needs_live_video_track() {
        let factory = FfmpegRecorderFactory::new(config());
        let stream = MediaStream::new(vec![MediaTrack::new(
            TrackKind::Video,
            "screen",
            TrackSource::new("x11grab", ":1.0"),
        )]);
        stream.stop_all();

        assert!(matches!(
            factory.create(&stream, RECORDING_MIME_TYPE),
            Err(CaptureError::NoLiveTracks)
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_recorder_stop_flushes_output_then_reports_stopped() {
        let mut recorder = shell_recorder("printf head; read x; printf tail", STOP_GRACE);
        let (tx, rx) = mpsc::unbounded_channel();

        recorder.start(tx).await.unwrap();
        assert_eq!(recorder.state(), RecorderState::Recording);

        recorder.stop().await.unwrap();
        assert_eq!(recorder.state(), RecorderState::Inactive);

        let (data, stopped) = drain(rx).await;
        assert_eq!(data, b"headtail");
        assert_eq!(stopped, 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_recorder_killed_after_stop_grace() {
        let mut recorder = shell_recorder("exec sleep 30", Duration::from_millis(200));
        let (tx, rx) = mpsc::unbounded_channel();

        recorder.start(tx).await.unwrap();
        let stop = tokio::time::timeout(Duration::from_secs(5), recorder.stop()).await;
        assert!(matches!(stop, Ok(Ok(()))));
        assert_eq!(recorder.state(), RecorderState::Inactive);

        let (data, stopped) = drain(rx).await;
        assert!(data.is_empty());
        assert_eq!(stopped, 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_recorder_exiting_by_itself_reports_stopped_once() {
        let mut recorder = shell_recorder("printf done", STOP_GRACE);
        let (tx, rx) = mpsc::unbounded_channel();

        recorder.start(tx).await.unwrap();
        for _ in 0..250 {
            if recorder.state() == RecorderState::Inactive {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(recorder.state(), RecorderState::Inactive);

        // A late stop must not report a second end
        recorder.stop().await.unwrap();

        let (data, stopped) = drain(rx).await;
        assert_eq!(data, b"done");
        assert_eq!(stopped, 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_recorder_rejects_second_start() {
        let mut recorder = shell_recorder("read x", STOP_GRACE);
        let (tx, rx) = mpsc::unbounded_channel();

        recorder.start(tx.clone()).await.unwrap();
        assert!(matches!(
            recorder.start(tx).await,
            Err(CaptureError::Recorder(_))
        ));

        recorder.stop().await.unwrap();
        assert_eq!(drain(rx).await.1, 1);
    }

    #[tokio::test]
    async fn test_acquire_without_ffmpeg_is_unavailable() {
        let source = FfmpegDisplaySource::new(CaptureConfig {
            ffmpeg_path: "/nonexistent/bin/ffmpeg".to_string(),
            ..config()
        });

        assert!(matches!(
            source.acquire(StreamConstraints::VIDEO_AND_AUDIO).await,
            Err(CaptureError::Unavailable(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_acquire_with_failing_grabber_is_denied() {
        let source = FfmpegDisplaySource::new(CaptureConfig {
            ffmpeg_path: "false".to_string(),
            ..config()
        });

        assert!(matches!(
            source.acquire(StreamConstraints::VIDEO_AND_AUDIO).await,
            Err(CaptureError::Denied(_))
        ));
    }

    #[test]
    fn test_last_line_skips_blank_lines() {
        assert_eq!(
            last_line(b"warning\n:1.0: Permission denied\n\n"),
            ":1.0: Permission denied"
        );
        assert_eq!(last_line(b""), "no output");
    }

    #[tokio::test]
    async fn test_pump_flushes_remainder_at_eof() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        pump_segments(&b"EBML header and clusters"[..], Duration::from_secs(60), &tx)
            .await
            .unwrap();

        assert_eq!(collect(&mut rx), vec![b"EBML header and clusters".to_vec()]);
    }

    #[tokio::test]
    async fn test_pump_cuts_segments_on_interval() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (mut writer, reader) = tokio::io::duplex(1024);

        let producer = tokio::spawn(async move {
            writer.write_all(b"first|").await.unwrap();
            tokio::time::sleep(Duration::from_millis(150)).await;
            writer.write_all(b"second").await.unwrap();
        });

        pump_segments(reader, Duration::from_millis(20), &tx).await.unwrap();
        producer.await.unwrap();

        let segments = collect(&mut rx);
        assert!(segments.len() >= 2, "{:?}", segments);
        assert!(segments.iter().all(|segment| !segment.is_empty()));
        assert_eq!(segments.concat(), b"first|second");
    }
}
