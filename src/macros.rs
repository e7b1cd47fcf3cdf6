// auto-implement ToFromWire for a tag-like enum backed by u8, rejecting
// unknown tags on decode instead of silently defaulting.
#[macro_export]
macro_rules! derive_wire_enum {
    ($t:ty, $default:expr) => {
        impl $crate::wire::ToFromWire for $t {
            fn to_wire_bytes(&self, v: &mut Vec<u8>) -> usize {
                v.push(*self as u8);
                1
            }

            fn from_wire_bytes(
                cursor: &mut std::io::Cursor<&[u8]>,
            ) -> $crate::error::TunnelResult<Self> {
                use std::io::Read;
                let mut byte = [0u8; 1];
                cursor.read_exact(&mut byte).map_err(|_| {
                    $crate::error::TunnelError::InvalidResponse(
                        "truncated frame type tag".into(),
                    )
                })?;
                <$t>::try_from(byte[0]).map_err(|_| {
                    $crate::error::TunnelError::InvalidResponse(format!(
                        "unknown tag {:#04x} for {}",
                        byte[0],
                        stringify!($t)
                    ))
                })
            }
        }

        impl Default for $t {
            fn default() -> Self {
                $default
            }
        }
    };
}
