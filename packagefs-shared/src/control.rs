//! Control-channel types and wire formats.
//!
//! The activation change request crosses an address-space boundary in the
//! original protocol: item names are pointers into the caller's copy of the
//! buffer and have to be relocated after the kernel copy. The codec here
//! keeps that contract byte-for-byte so external tooling can drive a volume
//! through the same ioctl payloads.
//!
//! Layout (little-endian, natural alignment):
//!
//! ```text
//! request:  u32 item_count, u32 padding, item[item_count], name bytes
//! item:     u32 type, u32 parent_device_id, u64 parent_directory_id,
//!           u64 name_ptr   (caller-space pointer, NUL-terminated target)
//! ```

use crate::constants::limits::MAX_ACTIVATION_REQUEST_SIZE;
use crate::errors::{PackageFsError, PackageFsResult};

/// Control operation codes.
pub mod ops {
    pub const GET_VOLUME_INFO: u32 = 1;
    pub const GET_PACKAGE_INFOS: u32 = 2;
    pub const CHANGE_ACTIVATION: u32 = 3;
}

/// How a volume is mounted; decides shine-through layout, default volume
/// name, and package link targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MountType {
    /// The home/config overlay; more specific than system, sorts first in
    /// package families.
    Home,
    /// The system installation.
    System,
    /// Anything else; no shine-through, private packagefs root.
    Custom,
}

impl MountType {
    /// Stable numeric tag used on the wire.
    pub fn as_u32(self) -> u32 {
        match self {
            MountType::System => 0,
            MountType::Home => 1,
            MountType::Custom => 2,
        }
    }
}

/// One kind of activation change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ActivationChangeKind {
    Activate = 1,
    Deactivate = 2,
    Reactivate = 3,
}

impl ActivationChangeKind {
    fn from_u32(value: u32) -> PackageFsResult<Self> {
        match value {
            1 => Ok(Self::Activate),
            2 => Ok(Self::Deactivate),
            3 => Ok(Self::Reactivate),
            other => Err(PackageFsError::bad_value(format!(
                "unknown activation change type {other}"
            ))),
        }
    }
}

/// One item of an activation change request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationChangeItem {
    pub kind: ActivationChangeKind,
    /// Device of the packages directory the caller believes it is talking to.
    pub parent_device_id: u32,
    /// Inode of that packages directory.
    pub parent_directory_id: u64,
    /// Package file name within the packages directory.
    pub name: String,
}

/// A decoded activation change request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationChangeRequest {
    pub items: Vec<ActivationChangeItem>,
}

const HEADER_SIZE: usize = 8;
const ITEM_SIZE: usize = 24;

impl ActivationChangeRequest {
    /// Encode into the wire format, with name pointers expressed relative
    /// to `caller_base` (the address the caller's copy of the buffer lives
    /// at).
    pub fn encode(&self, caller_base: u64) -> Vec<u8> {
        let names_offset = HEADER_SIZE + self.items.len() * ITEM_SIZE;
        let mut names = Vec::new();
        let mut buf = Vec::with_capacity(names_offset);

        buf.extend_from_slice(&(self.items.len() as u32).to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());

        for item in &self.items {
            let name_ptr = caller_base + (names_offset + names.len()) as u64;
            buf.extend_from_slice(&(item.kind as u32).to_le_bytes());
            buf.extend_from_slice(&item.parent_device_id.to_le_bytes());
            buf.extend_from_slice(&item.parent_directory_id.to_le_bytes());
            buf.extend_from_slice(&name_ptr.to_le_bytes());

            names.extend_from_slice(item.name.as_bytes());
            names.push(0);
        }

        buf.extend_from_slice(&names);
        buf
    }

    /// Decode a request from our copy of the buffer. `caller_base` is the
    /// address of the caller's copy; every name pointer is relocated by the
    /// difference and validated to point at a NUL-terminated string inside
    /// the buffer.
    pub fn decode(buffer: &[u8], caller_base: u64) -> PackageFsResult<Self> {
        if buffer.len() > MAX_ACTIVATION_REQUEST_SIZE {
            return Err(PackageFsError::bad_value("activation request too large"));
        }
        if buffer.len() < HEADER_SIZE {
            return Err(PackageFsError::bad_value("activation request truncated"));
        }

        let item_count = read_u32(buffer, 0) as usize;
        let items_end = HEADER_SIZE
            .checked_add(item_count.checked_mul(ITEM_SIZE).ok_or_else(|| {
                PackageFsError::bad_value("activation request item count overflow")
            })?)
            .ok_or_else(|| PackageFsError::bad_value("activation request item count overflow"))?;
        if items_end > buffer.len() {
            return Err(PackageFsError::bad_value(
                "activation request items exceed buffer",
            ));
        }

        let mut items = Vec::with_capacity(item_count);
        for index in 0..item_count {
            let at = HEADER_SIZE + index * ITEM_SIZE;
            let kind = ActivationChangeKind::from_u32(read_u32(buffer, at))?;
            let parent_device_id = read_u32(buffer, at + 4);
            let parent_directory_id = read_u64(buffer, at + 8);
            let name_ptr = read_u64(buffer, at + 16);

            // Relocate the caller-space pointer into our copy.
            let name_offset = name_ptr
                .checked_sub(caller_base)
                .filter(|offset| *offset < buffer.len() as u64)
                .ok_or_else(|| {
                    PackageFsError::bad_value("activation item name outside request buffer")
                })? as usize;

            let name_bytes = &buffer[name_offset..];
            let nul = name_bytes.iter().position(|b| *b == 0).ok_or_else(|| {
                PackageFsError::bad_value("activation item name not NUL-terminated")
            })?;
            let name = std::str::from_utf8(&name_bytes[..nul])
                .map_err(|_| PackageFsError::bad_value("activation item name not UTF-8"))?
                .to_owned();

            items.push(ActivationChangeItem {
                kind,
                parent_device_id,
                parent_directory_id,
                name,
            });
        }

        Ok(Self { items })
    }
}

fn read_u32(buffer: &[u8], at: usize) -> u32 {
    u32::from_le_bytes(buffer[at..at + 4].try_into().unwrap())
}

fn read_u64(buffer: &[u8], at: usize) -> u64 {
    u64::from_le_bytes(buffer[at..at + 8].try_into().unwrap())
}

/// Identity of one packages directory, as reported by `get_volume_info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackagesDirectoryInfo {
    pub device_id: u64,
    pub node_id: u64,
}

/// Reply of the `get_volume_info` control operation.
#[derive(Debug, Clone)]
pub struct VolumeInfo {
    pub mount_type: MountType,
    pub root_device_id: u64,
    pub root_directory_id: u64,
    pub packages_directories: Vec<PackagesDirectoryInfo>,
}

/// One active package, as reported by `get_package_infos`.
#[derive(Debug, Clone)]
pub struct PackageInfo {
    /// File name of the package archive.
    pub name: String,
    pub package_device_id: u64,
    pub package_node_id: u64,
    pub directory_device_id: u64,
    pub directory_node_id: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request() -> ActivationChangeRequest {
        ActivationChangeRequest {
            items: vec![
                ActivationChangeItem {
                    kind: ActivationChangeKind::Activate,
                    parent_device_id: 7,
                    parent_directory_id: 42,
                    name: "foo-1.0-x86_64.hpkg".into(),
                },
                ActivationChangeItem {
                    kind: ActivationChangeKind::Deactivate,
                    parent_device_id: 7,
                    parent_directory_id: 42,
                    name: "bar-2.1-x86_64.hpkg".into(),
                },
            ],
        }
    }

    #[test]
    fn test_roundtrip() {
        let request = sample_request();
        let caller_base = 0x7fff_1234_0000;
        let encoded = request.encode(caller_base);
        let decoded = ActivationChangeRequest::decode(&encoded, caller_base).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn test_rejects_pointer_outside_buffer() {
        let request = sample_request();
        let encoded = request.encode(0x1000);
        // Decoding with the wrong base leaves the relocated pointers
        // outside the buffer.
        let result = ActivationChangeRequest::decode(&encoded, 0x2000_0000);
        assert!(matches!(result, Err(PackageFsError::BadValue(_))));
    }

    #[test]
    fn test_rejects_unterminated_name() {
        let request = ActivationChangeRequest {
            items: vec![ActivationChangeItem {
                kind: ActivationChangeKind::Activate,
                parent_device_id: 1,
                parent_directory_id: 1,
                name: "x.hpkg".into(),
            }],
        };
        let mut encoded = request.encode(0);
        // chop the trailing NUL
        encoded.pop();
        let result = ActivationChangeRequest::decode(&encoded, 0);
        assert!(matches!(result, Err(PackageFsError::BadValue(_))));
    }

    #[test]
    fn test_rejects_truncated_items() {
        let encoded = sample_request().encode(0);
        let result = ActivationChangeRequest::decode(&encoded[..HEADER_SIZE + 4], 0);
        assert!(matches!(result, Err(PackageFsError::BadValue(_))));
    }

    #[test]
    fn test_empty_request() {
        let request = ActivationChangeRequest::default();
        let encoded = request.encode(0);
        let decoded = ActivationChangeRequest::decode(&encoded, 0).unwrap();
        assert!(decoded.items.is_empty());
    }
}
