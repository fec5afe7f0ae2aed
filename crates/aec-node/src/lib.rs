//! Acoustic echo cancellation node for periodic firmware-style pipelines.
//!
//! The node consumes a microphone stream and a render/loudspeaker feedback
//! stream in fixed 10 ms cycles, hands both to an [`EchoControl`]
//! implementation, and emits the cleaned capture. The scheduler drives it
//! through [`AecNode::init`], [`AecNode::prepare`] and [`AecNode::process`];
//! a control plane can retune it between cycles through
//! [`AecNode::set_config`], whose payload is the [`blob`] wire format.
//!
//! The echo-cancellation math itself lives behind [`EchoControl`] and
//! [`EchoControlFactory`]. [`Passthrough`] is the built-in stand-in for
//! pipelines assembled without a licensed canceller.
#![deny(unsafe_code)]

pub mod blob;
pub mod control;
pub mod passthrough;

mod adapter;
mod error;
mod negotiation;
mod node;
mod reconfig;

pub use self::blob::{
    BlobAssembler, BlobError, ConfigBlob, FragmentError, FragmentPosition, BLOB_VERSION,
};
pub use self::control::{
    AlgorithmError, EchoControl, EchoControlFactory, ParameterUpdate, StreamLayout,
};
pub use self::error::NodeError;
pub use self::node::{
    descriptor, AecNode, NodeConfig, NodeDescriptor, CYCLES_PER_SECOND, SUPPORTED_FORMATS,
};
pub use self::passthrough::{Passthrough, PassthroughFactory};
pub use self::reconfig::{
    BYTES_CONTROL_PARAM_ID, ENUM_CONTROL_PARAM_ID, SWITCH_CONTROL_PARAM_ID,
};
