mod barrier;
mod batch;
mod builder;
#[cfg(feature = "rg-debug")]
mod debug_dump;
mod executor;
mod graph;
mod pass;
mod persistent;
mod physical_resource;
mod resource_handle;
mod resource_registry;
mod resource_state;
mod resource_table;
mod semaphore_info;
mod settings;

// Re-exports
pub use barrier::{RgBarrierSynthesizer, RgBufferBarrierDesc, RgPassBarriers, RgPassUses, RgTextureBarrierDesc};
pub use batch::{RgBatch, partition_batches};
pub use builder::{BACKBUFFER, RgBuilder, RgTextureInitCallback};
pub use executor::{RgCompiledGraph, RgScheduledPass};
pub use graph::{DependencyAnalyzer, DependencyGraph, PassLinks};
pub use pass::{
    RgAttachment, RgAttachmentOps, RgBufferUse, RgHostCallback, RgPassBuilder, RgPassCallback, RgPassNode, RgPassType,
    RgRecordCallback, RgRuntime, RgTextureUse,
};
pub use persistent::RenderGraph;
pub use physical_resource::{RgPhysicalBuffer, RgPhysicalTexture, RgResourceKind, RgTemporalGroup};
pub use resource_handle::{
    RgBufferId, RgIndex, RgPassId, RgPhysicalBufferId, RgPhysicalTextureId, RgSemaphoreId, RgTextureId,
};
pub use resource_registry::RgResourceRegistry;
pub use resource_state::{RgBufferState, RgTextureState};
pub use resource_table::RgLogicalTable;
pub use semaphore_info::RgSemaphoreInfo;
pub use settings::RgSettings;
