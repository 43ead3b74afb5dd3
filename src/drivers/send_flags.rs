/// How a forward frame is sent through the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags(u8);

const SEND_TWICE_BIT: u8 = 0x01;
const EXPECT_ANSWER_BIT: u8 = 0x02;

pub const NO_FLAG: Flags = Flags(0);
/// Configuration commands that only take effect when repeated
pub const SEND_TWICE: Flags = Flags(SEND_TWICE_BIT);
pub const EXPECT_ANSWER: Flags = Flags(EXPECT_ANSWER_BIT);

impl Flags {
    pub const fn send_twice(&self) -> bool {
        self.0 & SEND_TWICE_BIT != 0
    }

    pub const fn expect_answer(&self) -> bool {
        self.0 & EXPECT_ANSWER_BIT != 0
    }
}

impl std::ops::BitOr<Flags> for Flags {
    type Output = Self;
    fn bitor(self, other: Flags) -> Self::Output {
        Flags(self.0 | other.0)
    }
}

impl std::ops::BitOrAssign<Flags> for Flags {
    fn bitor_assign(&mut self, other: Flags) {
        self.0 |= other.0;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn combine_flags() {
        let f = NO_FLAG | SEND_TWICE;
        assert!(f.send_twice());
        assert!(!f.expect_answer());
        let mut f = f;
        f |= EXPECT_ANSWER;
        assert!(f.send_twice() && f.expect_answer());
        assert_eq!(Flags::default(), NO_FLAG);
    }
}
