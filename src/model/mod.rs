mod node;
mod payload;
mod spec;

pub use node::Node;
pub use payload::{CreateOptions, CreatePayload, Script, UpdateOptions, UpdatePayload};
pub use spec::{DiskType, ESFLOW_LABEL, KIBANA_USERS_ENV, NodeSpec, NodeSpecInput};

pub(crate) use spec::KIBANA_PASSWORD_DIR;
