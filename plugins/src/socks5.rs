//! SOCKS5 detection: offer "no authentication" and wait for the server to
//! accept it.

use tracing::trace;

use crate::{Consumed, Probe};

pub const NAME: &str = "socks5";
pub const VERSION: u8 = 0x05;
const NO_AUTH: u8 = 0x00;

/// Version 5, one method offered, method "no authentication".
pub const GREETING: [u8; 3] = [VERSION, 0x01, NO_AUTH];

#[derive(Debug, Default, Clone)]
pub struct Socks5Probe;

impl Probe for Socks5Probe {
    fn init(&mut self) -> Vec<u8> {
        GREETING.to_vec()
    }

    fn consume(&mut self, data: &[u8]) -> Consumed {
        match data {
            [VERSION, NO_AUTH, ..] => Consumed::finished(data.len()),
            _ => {
                trace!(len = data.len(), "not a socks5 method selection");
                Consumed::nothing()
            }
        }
    }

    fn name(&self) -> &'static str {
        NAME
    }
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn greeting_offers_no_auth() {
        assert_eq!(Socks5Probe.init(), vec![0x05, 0x01, 0x00]);
    }

    #[test]
    fn accepted_method_finishes() {
        let out = Socks5Probe.consume(&[0x05, 0x00]);
        assert_eq!(out, Consumed::finished(2));
    }

    #[test]
    fn trailing_bytes_are_consumed_too() {
        let out = Socks5Probe.consume(&[0x05, 0x00, 0xde, 0xad]);
        assert!(out.finished);
        assert_eq!(out.consumed, 4);
    }

    #[test]
    fn other_replies_are_not_matched() {
        for reply in [&[0x05, 0x02][..], &[0x05, 0xff], &[0x04, 0x00], &[0x05], &[]] {
            let out = Socks5Probe.consume(reply);
            assert!(!out.finished, "{reply:?}");
            assert_eq!(out.consumed, 0);
            assert!(out.reply.is_empty());
        }
    }
}
