//! The single upstream session: connect, describe, read, relay, recover.

use std::sync::Arc;

use ffmpeg_source::{
    h264::{AccessUnitDecoder, NalFraming, ParameterSetCollector, ParameterSets},
    packet::SourcePacket,
    stream::{Codec, SourceStream},
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::IngestConfig;
use crate::media::{
    annexb,
    track::{SampleSink, TrackWriteError},
    types::{BitstreamSample, SampleClock},
};

pub mod source;

use source::{PacketSource, SourceConnector};

const PACKET_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("connect to {url}: {reason:#}")]
    Connect { url: String, reason: anyhow::Error },
    #[error("source offers no tracks")]
    NoTracks,
    #[error("primary track must be H.264, source offers {0}")]
    CodecMismatch(String),
    #[error("read from source: {0:#}")]
    Read(anyhow::Error),
    #[error("source ended the stream")]
    EndOfStream,
    #[error(transparent)]
    Write(TrackWriteError),
}

impl IngestError {
    /// Errors that no amount of reconnecting will fix.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            IngestError::NoTracks
                | IngestError::CodecMismatch(_)
                | IngestError::Write(_)
        )
    }
}

/// How a streaming session ended without an error.
#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    Cancelled,
}

enum SourceEvent {
    Packet(SourcePacket),
    End,
    Failed(anyhow::Error),
}

/// A connected and described source, ready to stream.
struct DescribedSource {
    source: Box<dyn PacketSource>,
    primary: SourceStream,
    /// `None` when the description has no SPS/PPS; they are then taken
    /// from the stream itself.
    params: Option<ParameterSets>,
    framing: NalFraming,
}

pub struct IngestSession {
    config: IngestConfig,
    connector: Arc<dyn SourceConnector>,
    sink: Arc<dyn SampleSink>,
    cancel: CancellationToken,
}

impl IngestSession {
    pub fn new(
        config: IngestConfig,
        connector: Arc<dyn SourceConnector>,
        sink: Arc<dyn SampleSink>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            connector,
            sink,
            cancel,
        }
    }

    /// Runs until cancelled or until a fatal error.
    ///
    /// Failing to connect or describe on the first attempt is fatal. Once a
    /// session has been established, every loss is retried after
    /// `reconnect_delay`, indefinitely.
    pub async fn run(self) -> Result<(), IngestError> {
        let mut established = false;
        loop {
            if self.cancel.is_cancelled() {
                return Ok(());
            }

            let opened = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                opened = self.open() => opened,
            };
            match opened {
                Ok(described) => {
                    established = true;
                    match self.stream(described).await {
                        Ok(SessionEnd::Cancelled) => return Ok(()),
                        Err(e) if e.is_fatal() => return Err(e),
                        Err(e) => log::warn!("ingest session lost: {}", e),
                    }
                }
                Err(e) if e.is_fatal() || !established => return Err(e),
                Err(e) => log::warn!("ingest reconnect failed: {}", e),
            }

            log::info!(
                "reconnecting to {} in {:?}",
                self.config.source_url,
                self.config.reconnect_delay
            );
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(self.config.reconnect_delay) => {}
            }
        }
    }

    async fn open(&self) -> Result<DescribedSource, IngestError> {
        let connector = Arc::clone(&self.connector);
        let url = self.config.source_url.clone();
        let options = self.config.input.clone();

        log::info!("connecting to {}", url);
        let connected = tokio::task::spawn_blocking(move || connector.connect(&url, &options))
            .await
            .map_err(|e| anyhow::anyhow!("connect task: {}", e))
            .and_then(|r| r);
        let source = connected.map_err(|reason| IngestError::Connect {
            url: self.config.source_url.clone(),
            reason,
        })?;

        describe(source)
    }

    async fn stream(&self, described: DescribedSource) -> Result<SessionEnd, IngestError> {
        let DescribedSource {
            source,
            primary,
            params,
            framing,
        } = described;

        let (tx, mut rx) = mpsc::channel(PACKET_CHANNEL_CAPACITY);
        let reader_cancel = self.cancel.child_token();
        let reader = spawn_reader(source, primary.index(), tx, reader_cancel.clone());

        let mut relay = PacketRelay::new(AccessUnitDecoder::new(framing), params);
        let result = loop {
            let event = tokio::select! {
                _ = self.cancel.cancelled() => break Ok(SessionEnd::Cancelled),
                event = rx.recv() => event,
            };
            match event {
                Some(SourceEvent::Packet(packet)) => {
                    if let Err(e) = relay.relay(&packet, self.sink.as_ref()).await {
                        break Err(e);
                    }
                }
                Some(SourceEvent::Failed(e)) => break Err(IngestError::Read(e)),
                Some(SourceEvent::End) | None => break Err(IngestError::EndOfStream),
            }
        };

        reader_cancel.cancel();
        drop(rx);
        if matches!(result, Err(IngestError::Read(_) | IngestError::EndOfStream)) {
            // the reader already returned; wait for it to drop the source
            let _ = reader.await;
        }

        log::info!(
            "ingest session closed after {} packets, {} samples",
            relay.packets,
            relay.samples
        );
        result
    }
}

/// Checks the primary track and extracts what the relay needs from it.
fn describe(source: Box<dyn PacketSource>) -> Result<DescribedSource, IngestError> {
    for stream in source.streams() {
        log::info!(
            "stream {} is {} (time base {}/{})",
            stream.index(),
            stream.codec_name(),
            stream.time_base().num,
            stream.time_base().den
        );
    }

    let primary = source
        .streams()
        .first()
        .cloned()
        .ok_or(IngestError::NoTracks)?;
    if primary.codec() != Codec::H264 {
        return Err(IngestError::CodecMismatch(primary.codec_name().to_string()));
    }
    if source.streams().len() > 1 {
        log::info!("ignoring all but the first stream");
    }

    let params = ParameterSets::from_extradata(primary.extradata());
    if params.is_none() {
        log::warn!("stream description carries no SPS/PPS, waiting for them in-band");
    }
    let framing = NalFraming::from_extradata(primary.extradata());

    Ok(DescribedSource {
        source,
        primary,
        params,
        framing,
    })
}

/// Reads on a blocking thread until the source ends, fails, or nobody
/// listens anymore. Packets of secondary tracks are dropped here.
fn spawn_reader(
    mut source: Box<dyn PacketSource>,
    primary_index: usize,
    tx: mpsc::Sender<SourceEvent>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        while !cancel.is_cancelled() {
            let event = match source.read_packet() {
                Ok(Some(packet)) if packet.stream_index() != primary_index => continue,
                Ok(Some(packet)) => SourceEvent::Packet(packet),
                Ok(None) => SourceEvent::End,
                Err(e) => SourceEvent::Failed(e),
            };
            let last = !matches!(event, SourceEvent::Packet(_));
            if tx.blocking_send(event).is_err() || last {
                break;
            }
        }
        drop(source);
    })
}

/// Per-session decode, timing and assembly state.
struct PacketRelay {
    decoder: AccessUnitDecoder,
    params: Option<ParameterSets>,
    in_band: ParameterSetCollector,
    clock: SampleClock,
    packets: u64,
    samples: u64,
}

impl PacketRelay {
    fn new(decoder: AccessUnitDecoder, params: Option<ParameterSets>) -> Self {
        Self {
            decoder,
            params,
            in_band: ParameterSetCollector::new(),
            clock: SampleClock::new(),
            packets: 0,
            samples: 0,
        }
    }

    async fn relay(&mut self, packet: &SourcePacket, sink: &dyn SampleSink) -> Result<(), IngestError> {
        self.packets += 1;

        let units = match self.decoder.decode(packet.data()) {
            Ok(units) => units,
            Err(e) if e.is_benign() => return Ok(()),
            Err(e) => {
                log::warn!("dropping packet: {}", e);
                return Ok(());
            }
        };

        if self.params.is_none() {
            self.params = self.in_band.observe(&units);
            if self.params.is_some() {
                log::info!("picked up SPS/PPS from the stream");
            }
        }
        // no keyframe leaves without SPS/PPS in front of it
        let Some(params) = &self.params else {
            log::debug!("dropping packet received before SPS/PPS");
            return Ok(());
        };

        let duration = self.clock.advance(packet.timestamp(), packet.time_base());
        let data = annexb::assemble(&units, params);
        if data.is_empty() {
            return Ok(());
        }

        match sink.write_sample(&BitstreamSample::new(data, duration)).await {
            Ok(()) | Err(TrackWriteError::ClosedPipe) => {
                self.samples += 1;
                Ok(())
            }
            Err(e) => Err(IngestError::Write(e)),
        }
    }
}

/// Spawns the ingest session as a supervised task.
pub(crate) fn start_ingest(
    config: IngestConfig,
    connector: Arc<dyn SourceConnector>,
    sink: Arc<dyn SampleSink>,
    cancel: CancellationToken,
) -> JoinHandle<Result<(), IngestError>> {
    let session = IngestSession::new(config, connector, sink, cancel);
    tokio::spawn(session.run())
}

#[cfg(test)]
#[path = "ingest_test.rs"]
mod ingest_test;
