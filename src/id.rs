#![allow(missing_docs)]

use std::fmt;
use std::ops::Deref;

macro_rules! num_id {
    ($id:ident, $t:ty, $rand:path) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $id($t);

        impl $id {
            pub fn new() -> Self {
                $id($rand(..))
            }
        }

        impl Deref for $id {
            type Target = $t;

            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl From<$t> for $id {
            fn from(v: $t) -> Self {
                $id(v)
            }
        }

        impl fmt::Display for $id {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

num_id!(Ssrc, u32, fastrand::u32);
num_id!(SeqNo, u16, fastrand::u16);
num_id!(TransportSeqNo, u16, fastrand::u16);

impl SeqNo {
    /// The following sequence number, wrapping the 16-bit space.
    pub fn next(&self) -> SeqNo {
        SeqNo(self.0.wrapping_add(1))
    }
}

impl TransportSeqNo {
    /// The following transport-wide sequence number, wrapping the 16-bit space.
    pub fn next(&self) -> TransportSeqNo {
        TransportSeqNo(self.0.wrapping_add(1))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn seq_no_next_wraps() {
        let seq: SeqNo = 65_535.into();
        assert_eq!(seq.next(), 0.into());
        assert_eq!(seq.next().next(), 1.into());
    }

    #[test]
    fn seq_no_orders_on_raw_value() {
        let low: SeqNo = 1.into();
        let high: SeqNo = 65_535.into();
        assert!(low < high);
        assert_eq!(*low, 1);
    }

    #[test]
    fn transport_seq_no_next_wraps() {
        let seq: TransportSeqNo = 65_535.into();
        assert_eq!(seq.next(), 0.into());
    }
}
