pub mod class_info;
pub mod interface;
pub mod interface_map;
pub mod object;
pub mod value;

pub use crate::class_info::{ClassInfo, ObjectKind};
pub use crate::interface::{
    iid, interface_id_from_name, query, InterfaceAccess, InterfaceId, InterfaceIdent, InterfaceRef,
};
pub use crate::interface_map::{InterfaceMap, InterfaceMapBuilder, DEFAULT_SECTION};
pub use crate::object::{
    AttributeFlags, Attributes, ObjectControl, ObjectStatus, OperationMode, ServiceObject,
};
pub use crate::value::Value;
