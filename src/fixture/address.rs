//! Address value parsed from DHCP config markers

use std::fmt;
use std::str::FromStr;

use crate::common::Error;

/// An interface address in CIDR notation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub address: String,
    pub prefix_len: u8,
    pub is_v6: bool,
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(cidr: &str) -> Result<Self, Self::Err> {
        let (address, prefix) = cidr
            .split_once('/')
            .ok_or_else(|| Error::InvalidAddress(cidr.to_string()))?;
        let prefix_len = prefix
            .trim()
            .parse::<u8>()
            .map_err(|_| Error::InvalidAddress(cidr.to_string()))?;
        let address = address.trim();
        if address.is_empty() {
            return Err(Error::InvalidAddress(cidr.to_string()));
        }

        Ok(Self {
            address: address.to_string(),
            prefix_len,
            is_v6: address.contains(':'),
        })
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_v4() {
        let addr: Address = "192.168.1.1/24".parse().unwrap();
        assert_eq!(addr.address, "192.168.1.1");
        assert_eq!(addr.prefix_len, 24);
        assert!(!addr.is_v6);
        assert_eq!(addr.to_string(), "192.168.1.1/24");
    }

    #[test]
    fn test_parse_v6() {
        let addr: Address = "fd00::1/64".parse().unwrap();
        assert!(addr.is_v6);
        assert_eq!(addr.prefix_len, 64);
    }

    #[test]
    fn test_structural_equality() {
        let a: Address = "10.0.0.1/8".parse().unwrap();
        let b: Address = " 10.0.0.1/8".parse().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_reject_missing_prefix() {
        assert!(matches!(
            "10.0.0.1".parse::<Address>(),
            Err(Error::InvalidAddress(_))
        ));
        assert!("10.0.0.1/abc".parse::<Address>().is_err());
    }
}
