pub mod actor;

pub use actor::{
    GetConnectionSnapshot, PushConnectionActor, PushConnectionArgs, PushEvent, WatchConnection,
};
