pub mod image;
pub mod node;

pub use image::{ImageEntry, ImageHistory};
pub use node::{
    ContainerMapping, HealingRecord, Node, NodeStatus, NodeSummary, METADATA_DISABLED_UNTIL,
    METADATA_FAILURES, METADATA_LAST_ERROR, METADATA_LAST_SUCCESS,
};
