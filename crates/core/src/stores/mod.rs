pub mod memory;
pub mod pinecone;

pub use memory::MemoryStore;
pub use pinecone::PineconeStore;
