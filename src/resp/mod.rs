//! RESP (REdis Serialization Protocol) codec: the wire format shared by
//! clients, primaries and replicas.

mod reader;
mod value;
mod writer;

pub use reader::{read_rdb_payload, read_reply, read_request, RespReadError};
pub use value::RespValue;
pub use writer::write_value;
