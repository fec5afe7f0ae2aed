//! Lifecycle orchestration: init, prepare, process, reset, free.
//!
//! One node sits between two sources and a sink in a periodically
//! scheduled pipeline. Every entry point is driven by the scheduler except
//! `set_config`, which the control plane calls between cycles. The cycle
//! path allocates nothing; everything it touches was sized at init and
//! proven sufficient at prepare.

use derive_more::Debug;

use aec_stream::{SampleFormat, Sink, Source, StreamFormat};

use crate::adapter::StreamAdapter;
use crate::blob::FragmentPosition;
use crate::control::{EchoControl, EchoControlFactory, ParameterUpdate, StreamLayout};
use crate::error::NodeError;
use crate::negotiation::{PinBindings, PinNegotiator};
use crate::reconfig::ReconfigEngine;

/// Scheduler invocations per second; one cycle covers `rate / 100` frames.
pub const CYCLES_PER_SECOND: u32 = 100;

/// Wire encodings accepted on the node's pins.
pub const SUPPORTED_FORMATS: &[SampleFormat] = &[SampleFormat::S16Le];

/// Everything init needs to shape a node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeConfig {
    /// Format shared by the microphone source and the output sink.
    pub capture_format: StreamFormat,
    /// Format of the render/loudspeaker feedback source.
    pub reference_format: StreamFormat,
    /// Linear capture headroom pushed to the algorithm at create.
    pub mic_gain: f32,
    /// Initial echo-path delay estimate pushed at create.
    pub reference_delay_ms: f32,
    /// Size of the working-memory arena handed to the algorithm. Zero
    /// means the algorithm allocates for itself.
    pub working_memory_bytes: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            capture_format: StreamFormat::new(16_000, 2, SampleFormat::S16Le),
            reference_format: StreamFormat::new(16_000, 2, SampleFormat::S16Le),
            mic_gain: 1.0,
            reference_delay_ms: 0.0,
            working_memory_bytes: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Ready,
    Bound,
    Running,
    Freed,
}

/// The echo-cancellation processing node.
#[derive(Debug)]
pub struct AecNode {
    state: State,
    config: NodeConfig,
    frames_per_cycle: usize,
    layout: StreamLayout,
    adapter: StreamAdapter,
    reconfig: ReconfigEngine,
    #[debug(skip)]
    algorithm: Option<Box<dyn EchoControl>>,
    #[debug(skip)]
    factory: Box<dyn EchoControlFactory>,
    bindings: Option<PinBindings>,
}

impl AecNode {
    /// Builds a node in the Ready state.
    ///
    /// Any failure returns with nothing retained; work done before the
    /// failing step is dropped on the way out.
    pub fn init(
        config: NodeConfig,
        factory: Box<dyn EchoControlFactory>,
    ) -> Result<Self, NodeError> {
        validate(&config)?;
        let frames_per_cycle = (config.capture_format.sample_rate_hz / CYCLES_PER_SECOND) as usize;
        let layout = layout_for(&config);

        let arena = allocate_arena(config.working_memory_bytes)?;
        let mut algorithm = factory.create(layout, arena).map_err(|error| {
            tracing::error!(%error, "algorithm create failed");
            NodeError::AlgorithmFailure
        })?;
        algorithm
            .set_parameters(initial_parameters(&config))
            .map_err(|error| {
                tracing::error!(%error, "initial parameter push failed");
                NodeError::AlgorithmFailure
            })?;

        let adapter = StreamAdapter::new(
            frames_per_cycle,
            config.reference_format.channels,
            config.capture_format.channels,
        )?;

        tracing::debug!(
            rate = config.capture_format.sample_rate_hz,
            frames = frames_per_cycle,
            capture_channels = config.capture_format.channels,
            reference_channels = config.reference_format.channels,
            "node ready"
        );
        Ok(Self {
            state: State::Ready,
            config,
            frames_per_cycle,
            layout,
            adapter,
            reconfig: ReconfigEngine::new(),
            algorithm: Some(algorithm),
            factory,
            bindings: None,
        })
    }

    /// Classifies and validates the attached pins, then applies any
    /// configuration delivered before binding.
    ///
    /// Re-runs the whole negotiation on every call, so a failed prepare
    /// leaves the node Ready and retryable.
    pub fn prepare(
        &mut self,
        sources: &mut [&mut dyn Source],
        sinks: &mut [&mut dyn Sink],
    ) -> Result<(), NodeError> {
        if !matches!(self.state, State::Ready | State::Bound) {
            tracing::error!(state = ?self.state, "prepare in the wrong state");
            return Err(NodeError::BadState);
        }

        let negotiator = PinNegotiator::new(
            self.config.capture_format.sample_rate_hz,
            SUPPORTED_FORMATS,
            self.frames_per_cycle,
        );
        let bindings = negotiator.attach(&*sources, &*sinks)?;

        for source in sources.iter_mut() {
            source.set_alignment(1, 1);
        }
        sinks[0].set_alignment(1, 1);

        negotiator
            .enforce_source(&mut *sources[bindings.reference], self.layout.reference_channels)?;
        negotiator
            .enforce_source(&mut *sources[bindings.microphone], self.layout.capture_input_channels)?;
        negotiator.enforce_sink(&mut *sinks[0], self.layout.capture_output_channels)?;

        negotiator.check_source_sizing(&*sources[bindings.microphone])?;
        negotiator.check_sink_sizing(&*sinks[0])?;
        negotiator.check_source_sizing(&*sources[bindings.reference])?;

        self.bindings = Some(bindings);
        self.apply_reconfigure()?;
        self.state = State::Bound;
        tracing::debug!(
            reference = bindings.reference,
            microphone = bindings.microphone,
            "pins bound"
        );
        Ok(())
    }

    /// Runs one cycle: consume any pending configuration, analyze one span
    /// of reference, cancel echo in one span of capture, emit it.
    pub fn process(
        &mut self,
        sources: &mut [&mut dyn Source],
        sinks: &mut [&mut dyn Sink],
    ) -> Result<(), NodeError> {
        if !matches!(self.state, State::Bound | State::Running) {
            tracing::error!(state = ?self.state, "process before prepare");
            return Err(NodeError::BadState);
        }
        let Some(bindings) = self.bindings else {
            return Err(NodeError::BadState);
        };
        debug_assert_eq!(sources.len(), 2);
        debug_assert_eq!(sinks.len(), 1);

        self.apply_reconfigure()?;

        let algorithm = self.algorithm.as_deref_mut().ok_or(NodeError::BadState)?;

        let reference = self.adapter.pull_reference(&mut *sources[bindings.reference]);
        algorithm.analyze_reference(reference).map_err(|error| {
            tracing::error!(%error, "reference analysis failed");
            NodeError::AlgorithmFailure
        })?;

        let capture = self.adapter.pull_microphone(&mut *sources[bindings.microphone]);
        algorithm.process_capture(capture).map_err(|error| {
            tracing::error!(%error, "capture processing failed");
            NodeError::AlgorithmFailure
        })?;
        self.adapter.push_output(&mut *sinks[0]);

        if self.state == State::Bound {
            tracing::debug!("first cycle complete");
            self.state = State::Running;
        }
        Ok(())
    }

    /// Returns the node to Ready: bindings dropped, staged configuration
    /// discarded, the algorithm re-created on its recycled working memory.
    /// Scratch allocations are retained.
    pub fn reset(&mut self) -> Result<(), NodeError> {
        match self.state {
            State::Freed => {
                tracing::error!("reset on a freed node");
                Err(NodeError::BadState)
            }
            State::Ready => Ok(()),
            State::Bound | State::Running => {
                let arena = self
                    .algorithm
                    .take()
                    .and_then(|algorithm| algorithm.detach_working_memory());
                self.layout = layout_for(&self.config);
                let mut algorithm = self.factory.create(self.layout, arena).map_err(|error| {
                    tracing::error!(%error, "algorithm re-create failed");
                    NodeError::AlgorithmFailure
                })?;
                algorithm
                    .set_parameters(initial_parameters(&self.config))
                    .map_err(|error| {
                        tracing::error!(%error, "initial parameter push failed");
                        NodeError::AlgorithmFailure
                    })?;
                self.algorithm = Some(algorithm);
                self.adapter.set_active_capture(self.layout.capture_input_channels);
                self.adapter.silence();
                self.reconfig.reset();
                self.bindings = None;
                self.state = State::Ready;
                tracing::debug!("node reset");
                Ok(())
            }
        }
    }

    /// Releases everything the node owns. Idempotent: calls after the
    /// first return success without touching anything.
    pub fn free(&mut self) -> Result<(), NodeError> {
        if self.state == State::Freed {
            return Ok(());
        }
        if let Some(algorithm) = self.algorithm.take() {
            drop(algorithm.detach_working_memory());
        }
        self.adapter.release();
        self.reconfig.release();
        self.bindings = None;
        self.state = State::Freed;
        tracing::debug!("node freed");
        Ok(())
    }

    /// Accepts one control-plane configuration write.
    pub fn set_config(
        &mut self,
        param_id: u32,
        position: FragmentPosition,
        offset_or_size: usize,
        fragment: &[u8],
    ) -> Result<(), NodeError> {
        if self.state == State::Freed {
            tracing::error!("configuration write on a freed node");
            return Err(NodeError::BadState);
        }
        self.reconfig
            .set_config(param_id, position, offset_or_size, fragment)
    }

    /// Configuration readback is not supported.
    pub fn get_config(&self, param_id: u32) -> Result<Vec<u8>, NodeError> {
        tracing::error!(param_id, "configuration readback is not supported");
        Err(NodeError::UnsupportedControlType)
    }

    #[inline]
    pub fn frames_per_cycle(&self) -> usize {
        self.frames_per_cycle
    }

    /// Capture channels currently processed per frame.
    #[inline]
    pub fn capture_channels(&self) -> usize {
        self.layout.capture_input_channels
    }

    /// Reference channels consumed per frame.
    #[inline]
    pub fn reference_channels(&self) -> usize {
        self.layout.reference_channels
    }

    /// Whether a configuration image is waiting to be consumed.
    #[inline]
    pub fn reconfigure_pending(&self) -> bool {
        self.reconfig.pending()
    }

    fn apply_reconfigure(&mut self) -> Result<(), NodeError> {
        let algorithm = self.algorithm.as_deref_mut().ok_or(NodeError::BadState)?;
        self.reconfig
            .apply(algorithm, &mut self.layout, self.adapter.capture_allocated())?;
        self.adapter.set_active_capture(self.layout.capture_input_channels);
        Ok(())
    }
}

/// Registry entry mapping a node type identifier to its constructor. The
/// surrounding runtime owns the registry; the node only hands this out.
#[derive(Debug, Clone, Copy)]
pub struct NodeDescriptor {
    pub kind: &'static str,
    pub create: fn(NodeConfig, Box<dyn EchoControlFactory>) -> Result<AecNode, NodeError>,
}

/// Descriptor for this node type.
pub fn descriptor() -> NodeDescriptor {
    NodeDescriptor {
        kind: "echo-cancel",
        create: AecNode::init,
    }
}

fn validate(config: &NodeConfig) -> Result<(), NodeError> {
    let capture = &config.capture_format;
    let reference = &config.reference_format;
    if capture.sample_rate_hz == 0 || capture.sample_rate_hz % CYCLES_PER_SECOND != 0 {
        tracing::error!(
            rate = capture.sample_rate_hz,
            "rate does not divide into whole cycles"
        );
        return Err(NodeError::FormatUnsupported);
    }
    if reference.sample_rate_hz != capture.sample_rate_hz {
        tracing::error!(
            capture_rate = capture.sample_rate_hz,
            reference_rate = reference.sample_rate_hz,
            "capture and reference must share one rate"
        );
        return Err(NodeError::FormatUnsupported);
    }
    if capture.channels == 0 || reference.channels == 0 {
        tracing::error!("formats must carry at least one channel");
        return Err(NodeError::FormatUnsupported);
    }
    if !SUPPORTED_FORMATS.contains(&capture.sample_format)
        || !SUPPORTED_FORMATS.contains(&reference.sample_format)
    {
        tracing::error!(
            capture_encoding = ?capture.sample_format,
            reference_encoding = ?reference.sample_format,
            "encoding not supported"
        );
        return Err(NodeError::FormatUnsupported);
    }
    Ok(())
}

fn layout_for(config: &NodeConfig) -> StreamLayout {
    StreamLayout {
        capture_rate_hz: config.capture_format.sample_rate_hz,
        capture_input_channels: config.capture_format.channels,
        capture_output_channels: config.capture_format.channels,
        reference_rate_hz: config.reference_format.sample_rate_hz,
        reference_channels: config.reference_format.channels,
    }
}

fn initial_parameters(config: &NodeConfig) -> ParameterUpdate {
    ParameterUpdate {
        mic_gain: Some(config.mic_gain),
        reference_delay_ms: Some(config.reference_delay_ms),
    }
}

fn allocate_arena(bytes: usize) -> Result<Option<Vec<u8>>, NodeError> {
    if bytes == 0 {
        return Ok(None);
    }
    let mut arena = Vec::new();
    if let Err(error) = arena.try_reserve_exact(bytes) {
        tracing::error!(%error, bytes, "working memory reservation failed");
        return Err(NodeError::from(error));
    }
    arena.resize(bytes, 0);
    Ok(Some(arena))
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::num::NonZero;
    use std::rc::Rc;

    use super::{descriptor, AecNode, NodeConfig, CYCLES_PER_SECOND};
    use crate::blob::{ConfigBlob, FragmentPosition};
    use crate::control::{
        AlgorithmError, EchoControl, EchoControlFactory, ParameterUpdate, StreamLayout,
    };
    use crate::error::NodeError;
    use crate::passthrough::PassthroughFactory;
    use crate::reconfig::BYTES_CONTROL_PARAM_ID;
    use aec_stream::{
        ChannelScratch, PinRole, RingSink, RingSource, SampleFormat, Sink, Source, StreamFormat,
    };

    fn config(rate: u32, capture_channels: usize, reference_channels: usize) -> NodeConfig {
        NodeConfig {
            capture_format: StreamFormat::new(rate, capture_channels, SampleFormat::S16Le),
            reference_format: StreamFormat::new(rate, reference_channels, SampleFormat::S16Le),
            ..NodeConfig::default()
        }
    }

    fn pin_source(role: PinRole, format: StreamFormat, frames: usize) -> RingSource {
        let frames = NonZero::new(frames).unwrap();
        RingSource::new(role, format, frames, frames)
    }

    fn pin_sink(format: StreamFormat, frames: usize) -> RingSink {
        let frames = NonZero::new(frames).unwrap();
        RingSink::new(PinRole::Output, format, frames, frames)
    }

    fn pins(config: &NodeConfig) -> (RingSource, RingSource, RingSink) {
        let frames = (config.capture_format.sample_rate_hz / CYCLES_PER_SECOND) as usize;
        (
            pin_source(PinRole::Reference, config.reference_format, frames),
            pin_source(PinRole::Microphone, config.capture_format, frames),
            pin_sink(config.capture_format, frames),
        )
    }

    fn deliver(node: &mut AecNode, blob: &ConfigBlob) {
        node.set_config(
            BYTES_CONTROL_PARAM_ID,
            FragmentPosition::Single,
            0,
            &blob.encode(),
        )
        .unwrap();
    }

    #[derive(Debug, Default)]
    struct Recorded {
        creates: usize,
        created_with_arena: Vec<bool>,
        created_layouts: Vec<StreamLayout>,
        layout_pushes: Vec<StreamLayout>,
        parameters: Vec<ParameterUpdate>,
        tunings: Vec<Vec<u8>>,
        analyzed: usize,
        processed: usize,
        fail_process: bool,
        fail_reconfigure: bool,
    }

    #[derive(Debug, Clone)]
    struct RecordingFactory(Rc<RefCell<Recorded>>);

    struct RecordingControl {
        record: Rc<RefCell<Recorded>>,
        working_memory: Option<Vec<u8>>,
    }

    impl EchoControlFactory for RecordingFactory {
        fn create(
            &self,
            layout: StreamLayout,
            working_memory: Option<Vec<u8>>,
        ) -> Result<Box<dyn EchoControl>, AlgorithmError> {
            let mut record = self.0.borrow_mut();
            record.creates += 1;
            record.created_with_arena.push(working_memory.is_some());
            record.created_layouts.push(layout);
            drop(record);
            Ok(Box::new(RecordingControl {
                record: Rc::clone(&self.0),
                working_memory,
            }))
        }
    }

    impl EchoControl for RecordingControl {
        fn analyze_reference(&mut self, _reference: &ChannelScratch) -> Result<(), AlgorithmError> {
            self.record.borrow_mut().analyzed += 1;
            Ok(())
        }

        fn process_capture(&mut self, _capture: &mut ChannelScratch) -> Result<(), AlgorithmError> {
            let mut record = self.record.borrow_mut();
            if record.fail_process {
                return Err(AlgorithmError(-22));
            }
            record.processed += 1;
            Ok(())
        }

        fn reconfigure(&mut self, tuning: &[u8]) -> Result<(), AlgorithmError> {
            let mut record = self.record.borrow_mut();
            if record.fail_reconfigure {
                return Err(AlgorithmError(-5));
            }
            record.tunings.push(tuning.to_vec());
            Ok(())
        }

        fn set_parameters(&mut self, update: ParameterUpdate) -> Result<(), AlgorithmError> {
            self.record.borrow_mut().parameters.push(update);
            Ok(())
        }

        fn set_stream_layout(&mut self, layout: StreamLayout) -> Result<(), AlgorithmError> {
            self.record.borrow_mut().layout_pushes.push(layout);
            Ok(())
        }

        fn detach_working_memory(self: Box<Self>) -> Option<Vec<u8>> {
            self.working_memory
        }
    }

    fn recording_node(config: NodeConfig) -> (AecNode, Rc<RefCell<Recorded>>) {
        let record = Rc::new(RefCell::new(Recorded::default()));
        let node = AecNode::init(config, Box::new(RecordingFactory(Rc::clone(&record)))).unwrap();
        (node, record)
    }

    #[test]
    fn descriptor_builds_ready_nodes() {
        let entry = descriptor();
        assert_eq!(entry.kind, "echo-cancel");
        let node = (entry.create)(NodeConfig::default(), Box::new(PassthroughFactory)).unwrap();
        assert_eq!(node.frames_per_cycle(), 160);
        assert_eq!(node.capture_channels(), 2);
        assert!(node.reconfigure_pending());
    }

    #[test]
    fn init_rejects_unusable_configs() {
        let uneven = config(16_001, 2, 2);
        assert!(matches!(
            AecNode::init(uneven, Box::new(PassthroughFactory)),
            Err(NodeError::FormatUnsupported)
        ));

        let mut split_rates = config(16_000, 2, 2);
        split_rates.reference_format.sample_rate_hz = 48_000;
        assert!(matches!(
            AecNode::init(split_rates, Box::new(PassthroughFactory)),
            Err(NodeError::FormatUnsupported)
        ));

        let hollow = config(16_000, 0, 2);
        assert!(matches!(
            AecNode::init(hollow, Box::new(PassthroughFactory)),
            Err(NodeError::FormatUnsupported)
        ));

        let mut wide_wire = config(16_000, 2, 2);
        wide_wire.capture_format.sample_format = SampleFormat::S32Le;
        assert!(matches!(
            AecNode::init(wide_wire, Box::new(PassthroughFactory)),
            Err(NodeError::FormatUnsupported)
        ));
    }

    #[test]
    fn prepare_rejects_rate_and_encoding_mismatches() {
        let config = config(16_000, 2, 2);
        let mut node = AecNode::init(config, Box::new(PassthroughFactory)).unwrap();

        let mut fast_ref = pin_source(
            PinRole::Reference,
            StreamFormat::new(48_000, 2, SampleFormat::S16Le),
            480,
        );
        let (_, mut mic, mut out) = pins(&config);
        {
            let mut sources: [&mut dyn Source; 2] = [&mut fast_ref, &mut mic];
            let mut sinks: [&mut dyn Sink; 1] = [&mut out];
            assert_eq!(
                node.prepare(&mut sources, &mut sinks),
                Err(NodeError::FormatUnsupported)
            );
        }

        let mut wide_mic = pin_source(
            PinRole::Microphone,
            StreamFormat::new(16_000, 2, SampleFormat::S32Le),
            160,
        );
        let (mut reference, _, mut out) = pins(&config);
        {
            let mut sources: [&mut dyn Source; 2] = [&mut reference, &mut wide_mic];
            let mut sinks: [&mut dyn Sink; 1] = [&mut out];
            assert_eq!(
                node.prepare(&mut sources, &mut sinks),
                Err(NodeError::FormatUnsupported)
            );
        }

        // Still retryable with conforming pins.
        let (mut reference, mut mic, mut out) = pins(&config);
        let mut sources: [&mut dyn Source; 2] = [&mut reference, &mut mic];
        let mut sinks: [&mut dyn Sink; 1] = [&mut out];
        node.prepare(&mut sources, &mut sinks).unwrap();
    }

    #[test]
    fn prepare_rejects_broken_topologies() {
        let config = config(16_000, 2, 2);
        let mut node = AecNode::init(config, Box::new(PassthroughFactory)).unwrap();

        let (mut reference, mut mic, mut out) = pins(&config);
        {
            let mut second_mic = pin_source(PinRole::Microphone, config.capture_format, 160);
            let mut sources: [&mut dyn Source; 2] = [&mut mic, &mut second_mic];
            let mut sinks: [&mut dyn Sink; 1] = [&mut out];
            assert_eq!(
                node.prepare(&mut sources, &mut sinks),
                Err(NodeError::RoleConflict)
            );
        }
        {
            let mut sources: [&mut dyn Source; 2] = [&mut reference, &mut mic];
            assert_eq!(
                node.prepare(&mut sources, &mut []),
                Err(NodeError::RoleConflict)
            );
        }
    }

    #[test]
    fn prepare_rejects_mis_sized_periods() {
        let config = config(16_000, 2, 2);
        let mut node = AecNode::init(config, Box::new(PassthroughFactory)).unwrap();

        let (mut reference, _, mut out) = pins(&config);
        // 100-frame period against a 160-frame cycle.
        let mut short_mic = RingSource::new(
            PinRole::Microphone,
            config.capture_format,
            NonZero::new(160).unwrap(),
            NonZero::new(100).unwrap(),
        );
        let mut sources: [&mut dyn Source; 2] = [&mut reference, &mut short_mic];
        let mut sinks: [&mut dyn Sink; 1] = [&mut out];
        assert_eq!(
            node.prepare(&mut sources, &mut sinks),
            Err(NodeError::FormatUnsupported)
        );
    }

    #[test]
    fn identity_cycle_reproduces_microphone_input() {
        let config = config(16_000, 2, 2);
        let mut node = AecNode::init(config, Box::new(PassthroughFactory)).unwrap();
        assert_eq!(node.frames_per_cycle(), 160);

        let (mut reference, mut mic, mut out) = pins(&config);
        let reference_samples: Vec<i16> = (1..=320).collect();
        let mic_samples: Vec<i16> = (1..=320).map(|v| v - 161).collect();
        assert_eq!(reference.feed(bytemuck::cast_slice(&reference_samples)), 640);
        assert_eq!(mic.feed(bytemuck::cast_slice(&mic_samples)), 640);

        {
            let mut sources: [&mut dyn Source; 2] = [&mut reference, &mut mic];
            let mut sinks: [&mut dyn Sink; 1] = [&mut out];
            node.prepare(&mut sources, &mut sinks).unwrap();
            node.process(&mut sources, &mut sinks).unwrap();
        }

        assert_eq!(out.buffered(), 640);
        let mut produced = vec![0u8; 640];
        assert_eq!(out.drain(&mut produced), 640);
        assert_eq!(
            bytemuck::cast_slice::<u8, i16>(&produced),
            mic_samples.as_slice()
        );
        // Both source spans were consumed.
        assert_eq!(reference.buffered(), 0);
        assert_eq!(mic.buffered(), 0);
    }

    #[test]
    fn process_before_prepare_is_a_state_error() {
        let config = config(16_000, 2, 2);
        let mut node = AecNode::init(config, Box::new(PassthroughFactory)).unwrap();
        let (mut reference, mut mic, mut out) = pins(&config);
        let mut sources: [&mut dyn Source; 2] = [&mut reference, &mut mic];
        let mut sinks: [&mut dyn Sink; 1] = [&mut out];
        assert_eq!(
            node.process(&mut sources, &mut sinks),
            Err(NodeError::BadState)
        );
    }

    #[test]
    fn only_the_last_delivered_image_is_applied_at_prepare() {
        let (mut node, record) = recording_node(config(16_000, 2, 2));
        assert_eq!(record.borrow().parameters.len(), 1);

        deliver(
            &mut node,
            &ConfigBlob {
                mic_gain: Some(1.5),
                ..ConfigBlob::default()
            },
        );
        deliver(
            &mut node,
            &ConfigBlob {
                mic_gain: Some(2.5),
                ..ConfigBlob::default()
            },
        );
        assert!(node.reconfigure_pending());

        let cfg = config(16_000, 2, 2);
        let (mut reference, mut mic, mut out) = pins(&cfg);
        let mut sources: [&mut dyn Source; 2] = [&mut reference, &mut mic];
        let mut sinks: [&mut dyn Sink; 1] = [&mut out];
        node.prepare(&mut sources, &mut sinks).unwrap();

        assert!(!node.reconfigure_pending());
        let record = record.borrow();
        assert_eq!(record.parameters.len(), 2);
        assert_eq!(record.parameters[1].mic_gain, Some(2.5));
        assert_eq!(record.parameters[1].reference_delay_ms, None);
    }

    #[test]
    fn channel_narrowing_takes_effect_and_pads_output() {
        let cfg = config(16_000, 2, 2);
        let mut node = AecNode::init(cfg, Box::new(PassthroughFactory)).unwrap();
        deliver(
            &mut node,
            &ConfigBlob {
                capture_input_channels: Some(1),
                ..ConfigBlob::default()
            },
        );

        let (mut reference, mut mic, mut out) = pins(&cfg);
        let samples: Vec<i16> = (1..=320).collect();
        reference.feed(bytemuck::cast_slice(&samples));
        mic.feed(bytemuck::cast_slice(&samples));

        {
            let mut sources: [&mut dyn Source; 2] = [&mut reference, &mut mic];
            let mut sinks: [&mut dyn Sink; 1] = [&mut out];
            node.prepare(&mut sources, &mut sinks).unwrap();
            assert_eq!(node.capture_channels(), 1);
            node.process(&mut sources, &mut sinks).unwrap();
        }

        let mut produced = vec![0u8; 640];
        out.drain(&mut produced);
        let frames: &[i16] = bytemuck::cast_slice(&produced);
        for (index, frame) in frames.chunks_exact(2).enumerate() {
            // Left channel passes through; right is padded silence.
            assert_eq!(frame[0], samples[index * 2]);
            assert_eq!(frame[1], 0);
        }
    }

    #[test]
    fn prepare_aborts_on_a_bad_pending_image_and_retries() {
        let cfg = config(16_000, 2, 2);
        let mut node = AecNode::init(cfg, Box::new(PassthroughFactory)).unwrap();
        deliver(
            &mut node,
            &ConfigBlob {
                capture_input_channels: Some(4),
                ..ConfigBlob::default()
            },
        );

        let (mut reference, mut mic, mut out) = pins(&cfg);
        {
            let mut sources: [&mut dyn Source; 2] = [&mut reference, &mut mic];
            let mut sinks: [&mut dyn Sink; 1] = [&mut out];
            assert_eq!(
                node.prepare(&mut sources, &mut sinks),
                Err(NodeError::ChannelCountMismatch)
            );
            assert!(node.reconfigure_pending());

            // Control plane replaces the image; prepare then goes through.
            deliver(
                &mut node,
                &ConfigBlob {
                    capture_input_channels: Some(2),
                    ..ConfigBlob::default()
                },
            );
            node.prepare(&mut sources, &mut sinks).unwrap();
        }
        assert!(!node.reconfigure_pending());
    }

    #[test]
    fn algorithm_failure_surfaces_as_a_cycle_failure() {
        let cfg = config(16_000, 2, 2);
        let (mut node, record) = recording_node(cfg);

        let (mut reference, mut mic, mut out) = pins(&cfg);
        let samples = vec![0i16; 320];
        reference.feed(bytemuck::cast_slice(&samples));
        mic.feed(bytemuck::cast_slice(&samples));

        let mut sources: [&mut dyn Source; 2] = [&mut reference, &mut mic];
        let mut sinks: [&mut dyn Sink; 1] = [&mut out];
        node.prepare(&mut sources, &mut sinks).unwrap();

        record.borrow_mut().fail_process = true;
        assert_eq!(
            node.process(&mut sources, &mut sinks),
            Err(NodeError::AlgorithmFailure)
        );
        assert_eq!(record.borrow().analyzed, 1);
        assert_eq!(record.borrow().processed, 0);
    }

    #[test]
    fn tuning_rejection_aborts_prepare_until_it_clears() {
        let cfg = config(16_000, 2, 2);
        let (mut node, record) = recording_node(cfg);
        deliver(
            &mut node,
            &ConfigBlob {
                tuning: Some(vec![1, 2, 3, 4]),
                ..ConfigBlob::default()
            },
        );
        record.borrow_mut().fail_reconfigure = true;

        let (mut reference, mut mic, mut out) = pins(&cfg);
        let mut sources: [&mut dyn Source; 2] = [&mut reference, &mut mic];
        let mut sinks: [&mut dyn Sink; 1] = [&mut out];
        assert_eq!(
            node.prepare(&mut sources, &mut sinks),
            Err(NodeError::AlgorithmFailure)
        );
        assert!(node.reconfigure_pending());

        record.borrow_mut().fail_reconfigure = false;
        node.prepare(&mut sources, &mut sinks).unwrap();
        assert_eq!(record.borrow().tunings, vec![vec![1, 2, 3, 4]]);
        assert!(!node.reconfigure_pending());
    }

    #[test]
    fn reset_recycles_the_working_arena() {
        let mut cfg = config(16_000, 2, 2);
        cfg.working_memory_bytes = 64;
        let (mut node, record) = recording_node(cfg);
        assert_eq!(record.borrow().created_with_arena, vec![true]);

        let (mut reference, mut mic, mut out) = pins(&cfg);
        let samples = vec![0i16; 320];
        reference.feed(bytemuck::cast_slice(&samples));
        mic.feed(bytemuck::cast_slice(&samples));
        {
            let mut sources: [&mut dyn Source; 2] = [&mut reference, &mut mic];
            let mut sinks: [&mut dyn Sink; 1] = [&mut out];
            node.prepare(&mut sources, &mut sinks).unwrap();
            node.process(&mut sources, &mut sinks).unwrap();
        }

        node.reset().unwrap();
        {
            let record = record.borrow();
            assert_eq!(record.creates, 2);
            assert_eq!(record.created_with_arena, vec![true, true]);
            // Initial parameters were re-applied to the fresh instance.
            assert_eq!(record.parameters.len(), 2);
        }
        assert!(node.reconfigure_pending());

        // Ready again: prepare and run another cycle.
        let mut drained = vec![0u8; 640];
        out.drain(&mut drained);
        reference.feed(bytemuck::cast_slice(&samples));
        mic.feed(bytemuck::cast_slice(&samples));
        let mut sources: [&mut dyn Source; 2] = [&mut reference, &mut mic];
        let mut sinks: [&mut dyn Sink; 1] = [&mut out];
        node.prepare(&mut sources, &mut sinks).unwrap();
        node.process(&mut sources, &mut sinks).unwrap();
    }

    #[test]
    fn reset_from_ready_changes_nothing() {
        let (mut node, record) = recording_node(config(16_000, 2, 2));
        node.reset().unwrap();
        assert_eq!(record.borrow().creates, 1);
    }

    #[test]
    fn free_is_terminal_and_idempotent() {
        let cfg = config(16_000, 2, 2);
        let mut node = AecNode::init(cfg, Box::new(PassthroughFactory)).unwrap();
        node.free().unwrap();
        node.free().unwrap();

        assert_eq!(node.reset(), Err(NodeError::BadState));
        assert_eq!(
            node.set_config(BYTES_CONTROL_PARAM_ID, FragmentPosition::Single, 0, &[]),
            Err(NodeError::BadState)
        );
        let (mut reference, mut mic, mut out) = pins(&cfg);
        let mut sources: [&mut dyn Source; 2] = [&mut reference, &mut mic];
        let mut sinks: [&mut dyn Sink; 1] = [&mut out];
        assert_eq!(
            node.prepare(&mut sources, &mut sinks),
            Err(NodeError::BadState)
        );
        assert_eq!(
            node.process(&mut sources, &mut sinks),
            Err(NodeError::BadState)
        );
    }

    #[test]
    fn readback_always_fails() {
        let node = AecNode::init(config(16_000, 2, 2), Box::new(PassthroughFactory)).unwrap();
        assert_eq!(
            node.get_config(BYTES_CONTROL_PARAM_ID),
            Err(NodeError::UnsupportedControlType)
        );
    }
}
