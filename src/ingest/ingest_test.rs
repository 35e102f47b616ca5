// ============================================================================
// Ingest Session Tests
// ============================================================================

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use ffmpeg_source::{
    input::InputOptions,
    packet::SourcePacket,
    stream::{Codec, SourceStream, TimeBase},
};
use tokio_util::sync::CancellationToken;

use super::source::{PacketSource, SourceConnector};
use super::{IngestError, IngestSession};
use crate::config::IngestConfig;
use crate::media::track::{SampleSink, TrackWriteError};
use crate::media::types::BitstreamSample;

const SPS: &[u8] = &[0x67, 0x42];
const PPS: &[u8] = &[0x68, 0xCE];
const START: &[u8] = &[0x00, 0x00, 0x00, 0x01];

// ------------------------------------------------------------------------
// Fakes
// ------------------------------------------------------------------------

type Read = Result<Option<SourcePacket>, String>;

struct FakeSource {
    streams: Vec<SourceStream>,
    reads: VecDeque<Read>,
}

impl PacketSource for FakeSource {
    fn streams(&self) -> &[SourceStream] {
        &self.streams
    }

    fn read_packet(&mut self) -> anyhow::Result<Option<SourcePacket>> {
        match self.reads.pop_front() {
            Some(Ok(packet)) => Ok(packet),
            Some(Err(e)) => Err(anyhow::anyhow!(e)),
            None => Ok(None),
        }
    }
}

/// Hands out scripted sessions in order, then refuses connections.
#[derive(Default)]
struct FakeConnector {
    sessions: Mutex<VecDeque<Result<FakeSource, String>>>,
    connects: AtomicUsize,
}

impl FakeConnector {
    fn with_sessions(sessions: Vec<Result<FakeSource, String>>) -> Arc<Self> {
        Arc::new(Self {
            sessions: Mutex::new(sessions.into()),
            connects: AtomicUsize::new(0),
        })
    }

    fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl SourceConnector for FakeConnector {
    fn connect(&self, _url: &str, _options: &InputOptions) -> anyhow::Result<Box<dyn PacketSource>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        match self.sessions.lock().unwrap().pop_front() {
            Some(Ok(source)) => Ok(Box::new(source)),
            Some(Err(e)) => Err(anyhow::anyhow!(e)),
            None => Err(anyhow::anyhow!("connection refused")),
        }
    }
}

/// Records samples; optionally fails the first writes with scripted errors.
#[derive(Default)]
struct RecordingSink {
    samples: Mutex<Vec<BitstreamSample>>,
    failures: Mutex<VecDeque<TrackWriteError>>,
}

impl RecordingSink {
    fn failing_with(errors: Vec<TrackWriteError>) -> Arc<Self> {
        Arc::new(Self {
            samples: Mutex::new(Vec::new()),
            failures: Mutex::new(errors.into()),
        })
    }

    fn samples(&self) -> Vec<BitstreamSample> {
        self.samples.lock().unwrap().clone()
    }
}

#[async_trait]
impl SampleSink for RecordingSink {
    async fn write_sample(&self, sample: &BitstreamSample) -> Result<(), TrackWriteError> {
        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        self.samples.lock().unwrap().push(sample.clone());
        Ok(())
    }
}

// ------------------------------------------------------------------------
// Helpers
// ------------------------------------------------------------------------

fn annexb_extradata() -> Bytes {
    [START, SPS, START, PPS].concat().into()
}

fn h264_stream() -> SourceStream {
    SourceStream::new(0, Codec::H264, TimeBase::RTP_VIDEO, annexb_extradata())
}

fn packet(index: usize, nal: &[u8], pts: i64) -> Read {
    let data = [START, nal].concat();
    Ok(Some(SourcePacket::new(
        index,
        data.into(),
        Some(pts),
        TimeBase::RTP_VIDEO,
    )))
}

fn source(reads: Vec<Read>) -> FakeSource {
    FakeSource {
        streams: vec![h264_stream()],
        reads: reads.into(),
    }
}

fn config(reconnect_delay: Duration) -> IngestConfig {
    IngestConfig {
        source_url: "rtsp://camera.test/stream".to_string(),
        reconnect_delay,
        input: InputOptions::default(),
    }
}

fn keyframe_sample(nal: &[u8]) -> Vec<u8> {
    [START, SPS, START, PPS, START, nal].concat()
}

async fn wait_until(mut done: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !done() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn spawn(
    connector: Arc<FakeConnector>,
    sink: Arc<RecordingSink>,
    delay: Duration,
) -> (
    tokio::task::JoinHandle<Result<(), IngestError>>,
    CancellationToken,
) {
    let cancel = CancellationToken::new();
    let session = IngestSession::new(config(delay), connector, sink, cancel.clone());
    (tokio::spawn(session.run()), cancel)
}

// ------------------------------------------------------------------------
// Relaying
// ------------------------------------------------------------------------

#[tokio::test]
async fn test_relays_samples_with_parameter_sets_and_durations() {
    let mut with_secondary = source(vec![
        packet(0, &[0x65, 0x01], 900_000),
        packet(1, &[0xFF, 0xF1], 900_000),
        Ok(Some(SourcePacket::new(
            0,
            Bytes::new(),
            Some(901_500),
            TimeBase::RTP_VIDEO,
        ))),
        packet(0, &[0xAA, 0xBB], 903_000),
    ]);
    with_secondary.streams.push(SourceStream::new(
        1,
        Codec::Other,
        TimeBase::new(1, 8_000),
        Bytes::new(),
    ));
    let connector = FakeConnector::with_sessions(vec![Ok(with_secondary)]);
    let sink = Arc::new(RecordingSink::default());

    let (handle, cancel) = spawn(connector.clone(), sink.clone(), Duration::from_millis(10));
    wait_until(|| sink.samples().len() >= 2).await;
    cancel.cancel();
    handle.await.unwrap().unwrap();

    let samples = sink.samples();
    assert_eq!(samples.len(), 2);
    assert_eq!(&samples[0].data[..], &keyframe_sample(&[0x65, 0x01])[..]);
    assert_eq!(samples[0].duration, Duration::ZERO);
    assert_eq!(&samples[1].data[..], &[0x00, 0x00, 0x00, 0x01, 0xAA, 0xBB]);
    assert_eq!(samples[1].duration, Duration::from_nanos(33_333_333));
}

#[tokio::test]
async fn test_malformed_packet_is_dropped_and_session_continues() {
    let avcc_stream = SourceStream::new(
        0,
        Codec::H264,
        TimeBase::RTP_VIDEO,
        Bytes::from_static(&[
            0x01, 0x42, 0xC0, 0x1E, 0xFF, 0xE1, 0x00, 0x02, 0x67, 0x42, 0x01, 0x00, 0x02, 0x68,
            0xCE,
        ]),
    );
    let reads = vec![
        // length prefix claims more bytes than the packet holds
        Ok(Some(SourcePacket::new(
            0,
            Bytes::from_static(&[0, 0, 0, 9, 0x41]),
            Some(0),
            TimeBase::RTP_VIDEO,
        ))),
        Ok(Some(SourcePacket::new(
            0,
            Bytes::from_static(&[0, 0, 0, 2, 0x65, 0x01]),
            Some(3_000),
            TimeBase::RTP_VIDEO,
        ))),
    ];
    let connector = FakeConnector::with_sessions(vec![Ok(FakeSource {
        streams: vec![avcc_stream],
        reads: reads.into(),
    })]);
    let sink = Arc::new(RecordingSink::default());

    let (handle, cancel) = spawn(connector, sink.clone(), Duration::from_millis(10));
    wait_until(|| !sink.samples().is_empty()).await;
    cancel.cancel();
    handle.await.unwrap().unwrap();

    let samples = sink.samples();
    assert_eq!(samples.len(), 1);
    assert_eq!(&samples[0].data[..], &keyframe_sample(&[0x65, 0x01])[..]);
    // the dropped packet did not consume a timestamp
    assert_eq!(samples[0].duration, Duration::ZERO);
}

// ------------------------------------------------------------------------
// Recovery
// ------------------------------------------------------------------------

#[tokio::test]
async fn test_reconnects_after_connection_loss() {
    let connector = FakeConnector::with_sessions(vec![
        Ok(source(vec![
            packet(0, &[0x65, 0x01], 0),
            Err("connection reset by peer".to_string()),
        ])),
        Err("camera rebooting".to_string()),
        Ok(source(vec![packet(0, &[0x41, 0x02], 450_000)])),
    ]);
    let sink = Arc::new(RecordingSink::default());

    let (handle, cancel) = spawn(connector.clone(), sink.clone(), Duration::from_millis(20));
    wait_until(|| sink.samples().len() >= 2).await;
    cancel.cancel();
    handle.await.unwrap().unwrap();

    assert!(connector.connects() >= 3);
    let samples = sink.samples();
    assert_eq!(&samples[0].data[..], &keyframe_sample(&[0x65, 0x01])[..]);
    assert_eq!(&samples[1].data[..], &[0x00, 0x00, 0x00, 0x01, 0x41, 0x02]);
    // timing restarts with the new session
    assert_eq!(samples[1].duration, Duration::ZERO);
}

#[tokio::test]
async fn test_cancel_interrupts_backoff() {
    let connector = FakeConnector::with_sessions(vec![Ok(source(vec![]))]);
    let sink = Arc::new(RecordingSink::default());

    let (handle, cancel) = spawn(connector.clone(), sink, Duration::from_secs(3600));
    wait_until(|| connector.connects() == 1).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    cancel.cancel();

    let result = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("ingest did not stop on cancel");
    result.unwrap().unwrap();
    assert_eq!(connector.connects(), 1);
}

// ------------------------------------------------------------------------
// Fatal errors
// ------------------------------------------------------------------------

#[tokio::test]
async fn test_initial_connect_failure_is_fatal() {
    let connector = FakeConnector::with_sessions(vec![Err("no route to host".to_string())]);
    let sink = Arc::new(RecordingSink::default());

    let (handle, _cancel) = spawn(connector.clone(), sink, Duration::from_millis(1));
    let err = handle.await.unwrap().unwrap_err();
    assert!(matches!(err, IngestError::Connect { .. }));
    assert!(err.to_string().contains("no route to host"));
    assert_eq!(connector.connects(), 1);
}

#[tokio::test]
async fn test_primary_codec_mismatch_is_fatal() {
    let mut wrong = source(vec![]);
    wrong.streams = vec![SourceStream::new(
        0,
        Codec::Other,
        TimeBase::RTP_VIDEO,
        Bytes::new(),
    )];
    let connector = FakeConnector::with_sessions(vec![Ok(wrong)]);
    let sink = Arc::new(RecordingSink::default());

    let (handle, _cancel) = spawn(connector, sink, Duration::from_millis(1));
    let err = handle.await.unwrap().unwrap_err();
    assert!(matches!(err, IngestError::CodecMismatch(_)));
    assert!(err.is_fatal());
}

#[tokio::test]
async fn test_parameter_sets_taken_in_band_when_description_has_none() {
    let in_band = [START, SPS, START, PPS, START, &[0x65u8, 0x03][..]].concat();
    let mut bare = source(vec![
        packet(0, &[0x41, 0x01], 0),
        packet(0, &[0x65, 0x02], 3_000),
        Ok(Some(SourcePacket::new(
            0,
            in_band.into(),
            Some(6_000),
            TimeBase::RTP_VIDEO,
        ))),
        packet(0, &[0x41, 0x04], 9_000),
    ]);
    bare.streams = vec![SourceStream::new(
        0,
        Codec::H264,
        TimeBase::RTP_VIDEO,
        Bytes::new(),
    )];
    let connector = FakeConnector::with_sessions(vec![Ok(bare)]);
    let sink = Arc::new(RecordingSink::default());

    let (handle, cancel) = spawn(connector, sink.clone(), Duration::from_secs(3600));
    wait_until(|| sink.samples().len() == 2).await;
    cancel.cancel();
    handle.await.unwrap().unwrap();

    let samples = sink.samples();
    // the in-band SPS/PPS pass through, then the keyframe gets its own copy
    let expected = [START, SPS, START, PPS, &keyframe_sample(&[0x65, 0x03])[..]].concat();
    assert_eq!(&samples[0].data[..], &expected[..]);
    assert_eq!(samples[0].duration, Duration::ZERO);
    assert_eq!(&samples[1].data[..], &[0x00, 0x00, 0x00, 0x01, 0x41, 0x04]);
    assert_eq!(samples[1].duration, Duration::from_nanos(33_333_333));
}

#[tokio::test]
async fn test_closed_pipe_writes_are_ignored() {
    let connector = FakeConnector::with_sessions(vec![Ok(source(vec![
        packet(0, &[0x65, 0x01], 0),
        packet(0, &[0x41, 0x02], 3_000),
    ]))]);
    let sink = RecordingSink::failing_with(vec![TrackWriteError::ClosedPipe]);

    let (handle, cancel) = spawn(connector, sink.clone(), Duration::from_millis(10));
    wait_until(|| !sink.samples().is_empty()).await;
    cancel.cancel();
    handle.await.unwrap().unwrap();

    let samples = sink.samples();
    assert_eq!(samples.len(), 1);
    assert_eq!(&samples[0].data[..], &[0x00, 0x00, 0x00, 0x01, 0x41, 0x02]);
}

#[tokio::test]
async fn test_other_write_failure_is_fatal() {
    let connector = FakeConnector::with_sessions(vec![Ok(source(vec![packet(
        0,
        &[0x65, 0x01],
        0,
    )]))]);
    let sink = RecordingSink::failing_with(vec![TrackWriteError::Transport(
        webrtc::Error::new("srtp: write failed".to_owned()),
    )]);

    let (handle, _cancel) = spawn(connector, sink, Duration::from_millis(1));
    let err = handle.await.unwrap().unwrap_err();
    assert!(matches!(err, IngestError::Write(TrackWriteError::Transport(_))));
}

#[test]
fn test_fatal_classification() {
    assert!(!IngestError::EndOfStream.is_fatal());
    assert!(!IngestError::Read(anyhow::anyhow!("timeout")).is_fatal());
    assert!(!IngestError::Connect {
        url: "rtsp://x".to_string(),
        reason: anyhow::anyhow!("refused"),
    }
    .is_fatal());
    assert!(IngestError::NoTracks.is_fatal());
}
