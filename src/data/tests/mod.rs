mod cpython;
mod shard;
