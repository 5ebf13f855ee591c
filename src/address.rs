//! Resource address parsing.
//!
//! Parses the VISA-style resource strings found in bench configuration
//! documents and classifies them by transport, without touching any hardware.
//!
//! Supported forms (keywords are case-insensitive, the board number after the
//! interface keyword is optional and defaults to 0):
//!
//! - `GPIB<board>::<primary>[::<secondary>]::INSTR`
//! - `USB<board>::<vendor>::<product>::<serial>[::<interface>]::INSTR`
//! - `TCPIP<board>::<host>::<device>::INSTR` (e.g. `inst0`, `hislip0`)
//! - `TCPIP<board>::<host>::<port>::SOCKET`
//! - `ASRL<port>::INSTR`
//! - `<host>:<port>` (raw network socket, IPv6 hosts in brackets)
//!
//! USB vendor and product IDs are hex with an optional `0x` prefix. Every
//! other numeric field is plain decimal digits.

use crate::error::BenchError;
use std::fmt;
use std::str::FromStr;

/// Highest primary/secondary address on a GPIB bus.
const GPIB_MAX_ADDRESS: u8 = 30;

/// Transport family of a resource address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// IEEE-488 bus instrument
    Gpib,
    /// USB-TMC instrument
    Usb,
    /// LAN instrument (VXI-11, HiSLIP or raw SCPI socket)
    Tcpip,
    /// Serial port instrument
    Serial,
    /// Bare `host:port` network socket
    Socket,
}

impl TransportKind {
    /// Short lowercase label.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Gpib => "gpib",
            TransportKind::Usb => "usb",
            TransportKind::Tcpip => "tcpip",
            TransportKind::Serial => "serial",
            TransportKind::Socket => "socket",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed and validated resource address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceAddress {
    /// `GPIB<board>::<primary>[::<secondary>]::INSTR`
    Gpib {
        /// Controller board number
        board: u16,
        /// Primary bus address (0..=30)
        primary: u8,
        /// Secondary bus address (0..=30)
        secondary: Option<u8>,
    },
    /// `USB<board>::<vendor>::<product>::<serial>[::<interface>]::INSTR`
    Usb {
        /// Board number
        board: u16,
        /// USB vendor ID
        vendor_id: u16,
        /// USB product ID
        product_id: u16,
        /// Device serial number
        serial: String,
        /// USB interface number
        interface: Option<u16>,
    },
    /// `TCPIP<board>::<host>::<device>::INSTR`
    TcpipInstr {
        /// Board number
        board: u16,
        /// Host name or IP address
        host: String,
        /// LAN device name, e.g. `inst0`
        device: String,
    },
    /// `TCPIP<board>::<host>::<port>::SOCKET`
    TcpipSocket {
        /// Board number
        board: u16,
        /// Host name or IP address
        host: String,
        /// TCP port
        port: u16,
    },
    /// `ASRL<port>::INSTR`
    Serial {
        /// Port number or device path
        port: String,
    },
    /// `<host>:<port>`
    Socket {
        /// Host name or IP address
        host: String,
        /// TCP port
        port: u16,
    },
}

impl ResourceAddress {
    /// Parse an address string.
    ///
    /// Fails with [`BenchError::AddressFormat`] when the string matches none of
    /// the supported forms. Performs no I/O.
    pub fn parse(address: &str) -> Result<Self, BenchError> {
        let raw = address.trim();
        if raw.is_empty() {
            return Err(format_error(address, "address is empty"));
        }

        if raw.starts_with('[') || !raw.contains("::") {
            return parse_socket(address, raw);
        }

        let fields: Vec<&str> = raw.split("::").collect();
        if fields.iter().any(|f| f.trim().is_empty()) {
            return Err(format_error(address, "empty field between '::' separators"));
        }

        let head = fields[0].to_ascii_uppercase();
        if let Some(board) = head.strip_prefix("GPIB") {
            parse_gpib(address, board, &fields)
        } else if let Some(board) = head.strip_prefix("USB") {
            parse_usb(address, board, &fields)
        } else if let Some(board) = head.strip_prefix("TCPIP") {
            parse_tcpip(address, board, &fields)
        } else if head.starts_with("ASRL") {
            parse_serial(address, &fields)
        } else {
            Err(format_error(
                address,
                format!("unrecognized interface type '{}'", fields[0]),
            ))
        }
    }

    /// Transport family this address belongs to.
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Gpib { .. } => TransportKind::Gpib,
            Self::Usb { .. } => TransportKind::Usb,
            Self::TcpipInstr { .. } | Self::TcpipSocket { .. } => TransportKind::Tcpip,
            Self::Serial { .. } => TransportKind::Serial,
            Self::Socket { .. } => TransportKind::Socket,
        }
    }

    /// Host and port for addresses reachable over a plain TCP socket.
    pub fn socket_target(&self) -> Option<(&str, u16)> {
        match self {
            Self::TcpipSocket { host, port, .. } | Self::Socket { host, port } => {
                Some((host.as_str(), *port))
            }
            _ => None,
        }
    }
}

impl FromStr for ResourceAddress {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ResourceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gpib {
                board,
                primary,
                secondary,
            } => match secondary {
                Some(sec) => write!(f, "GPIB{board}::{primary}::{sec}::INSTR"),
                None => write!(f, "GPIB{board}::{primary}::INSTR"),
            },
            Self::Usb {
                board,
                vendor_id,
                product_id,
                serial,
                interface,
            } => {
                write!(f, "USB{board}::0x{vendor_id:04X}::0x{product_id:04X}::{serial}")?;
                if let Some(iface) = interface {
                    write!(f, "::{iface}")?;
                }
                f.write_str("::INSTR")
            }
            Self::TcpipInstr {
                board,
                host,
                device,
            } => write!(f, "TCPIP{board}::{host}::{device}::INSTR"),
            Self::TcpipSocket { board, host, port } => {
                write!(f, "TCPIP{board}::{host}::{port}::SOCKET")
            }
            Self::Serial { port } => write!(f, "ASRL{port}::INSTR"),
            Self::Socket { host, port } if host.contains(':') => write!(f, "[{host}]:{port}"),
            Self::Socket { host, port } => write!(f, "{host}:{port}"),
        }
    }
}

fn format_error(address: &str, reason: impl Into<String>) -> BenchError {
    BenchError::AddressFormat {
        address: address.to_string(),
        reason: reason.into(),
    }
}

fn all_digits(field: &str, radix: u32) -> bool {
    !field.is_empty() && field.chars().all(|c| c.is_digit(radix))
}

fn parse_board(address: &str, digits: &str) -> Result<u16, BenchError> {
    if digits.is_empty() {
        return Ok(0);
    }
    if !all_digits(digits, 10) {
        return Err(format_error(address, format!("invalid board number '{digits}'")));
    }
    digits
        .parse()
        .map_err(|_| format_error(address, format!("invalid board number '{digits}'")))
}

fn expect_suffix(address: &str, fields: &[&str], suffix: &str) -> Result<(), BenchError> {
    match fields.last() {
        Some(last) if last.eq_ignore_ascii_case(suffix) => Ok(()),
        _ => Err(format_error(address, format!("missing '::{suffix}' suffix"))),
    }
}

fn parse_bus_address(address: &str, field: &str, what: &str) -> Result<u8, BenchError> {
    let value: u8 = Some(field)
        .filter(|f| all_digits(f, 10))
        .and_then(|f| f.parse().ok())
        .ok_or_else(|| format_error(address, format!("invalid {what} address '{field}'")))?;
    if value > GPIB_MAX_ADDRESS {
        return Err(format_error(
            address,
            format!("{what} address {value} out of range 0..={GPIB_MAX_ADDRESS}"),
        ));
    }
    Ok(value)
}

/// USB vendor and product IDs are hex, with or without a `0x` prefix.
fn parse_usb_id(address: &str, field: &str, what: &str) -> Result<u16, BenchError> {
    let hex = field
        .strip_prefix("0x")
        .or_else(|| field.strip_prefix("0X"))
        .unwrap_or(field);
    Some(hex)
        .filter(|h| all_digits(h, 16))
        .and_then(|h| u16::from_str_radix(h, 16).ok())
        .ok_or_else(|| format_error(address, format!("invalid USB {what} '{field}'")))
}

fn parse_port(address: &str, field: &str) -> Result<u16, BenchError> {
    if !all_digits(field, 10) {
        return Err(format_error(address, format!("invalid port '{field}'")));
    }
    match field.parse::<u16>() {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(format_error(address, format!("invalid port '{field}'"))),
    }
}

fn parse_gpib(address: &str, board: &str, fields: &[&str]) -> Result<ResourceAddress, BenchError> {
    if !(3..=4).contains(&fields.len()) {
        return Err(format_error(
            address,
            "GPIB address needs GPIB<board>::<primary>[::<secondary>]::INSTR",
        ));
    }
    expect_suffix(address, fields, "INSTR")?;

    let board = parse_board(address, board)?;
    let primary = parse_bus_address(address, fields[1], "primary")?;
    let secondary = match fields.len() {
        4 => Some(parse_bus_address(address, fields[2], "secondary")?),
        _ => None,
    };

    Ok(ResourceAddress::Gpib {
        board,
        primary,
        secondary,
    })
}

fn parse_usb(address: &str, board: &str, fields: &[&str]) -> Result<ResourceAddress, BenchError> {
    if !(5..=6).contains(&fields.len()) {
        return Err(format_error(
            address,
            "USB address needs USB<board>::<vendor>::<product>::<serial>[::<interface>]::INSTR",
        ));
    }
    expect_suffix(address, fields, "INSTR")?;

    let interface = match fields.len() {
        6 => Some(
            Some(fields[4])
                .filter(|f| all_digits(f, 10))
                .and_then(|f| f.parse().ok())
                .ok_or_else(|| format_error(address, format!("invalid USB interface '{}'", fields[4])))?,
        ),
        _ => None,
    };

    Ok(ResourceAddress::Usb {
        board: parse_board(address, board)?,
        vendor_id: parse_usb_id(address, fields[1], "vendor ID")?,
        product_id: parse_usb_id(address, fields[2], "product ID")?,
        serial: fields[3].to_string(),
        interface,
    })
}

fn parse_tcpip(address: &str, board: &str, fields: &[&str]) -> Result<ResourceAddress, BenchError> {
    if fields.len() != 4 {
        return Err(format_error(
            address,
            "TCPIP address needs TCPIP<board>::<host>::<device>::INSTR or TCPIP<board>::<host>::<port>::SOCKET",
        ));
    }

    let board = parse_board(address, board)?;
    let host = fields[1].to_string();

    if fields[3].eq_ignore_ascii_case("SOCKET") {
        return Ok(ResourceAddress::TcpipSocket {
            board,
            host,
            port: parse_port(address, fields[2])?,
        });
    }
    expect_suffix(address, fields, "INSTR")?;

    Ok(ResourceAddress::TcpipInstr {
        board,
        host,
        device: fields[2].to_string(),
    })
}

fn parse_serial(address: &str, fields: &[&str]) -> Result<ResourceAddress, BenchError> {
    if fields.len() != 2 {
        return Err(format_error(address, "serial address needs ASRL<port>::INSTR"));
    }
    expect_suffix(address, fields, "INSTR")?;

    // Keep the port text as written; device paths are case-sensitive.
    let port = &fields[0][4..];
    if port.is_empty() {
        return Err(format_error(address, "serial address has no port"));
    }
    Ok(ResourceAddress::Serial {
        port: port.to_string(),
    })
}

fn parse_socket(address: &str, raw: &str) -> Result<ResourceAddress, BenchError> {
    let (host, port) = if let Some(rest) = raw.strip_prefix('[') {
        rest.split_once("]:")
            .ok_or_else(|| format_error(address, "expected [host]:port"))?
    } else {
        raw.rsplit_once(':')
            .ok_or_else(|| format_error(address, "expected host:port or a '::'-separated resource"))?
    };

    if host.is_empty() || host.chars().any(char::is_whitespace) {
        return Err(format_error(address, format!("invalid host '{host}'")));
    }

    Ok(ResourceAddress::Socket {
        host: host.to_string(),
        port: parse_port(address, port)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(s: &str) -> ResourceAddress {
        ResourceAddress::parse(s).unwrap_or_else(|e| panic!("{s} should parse: {e}"))
    }

    fn assert_format_error(s: &str) {
        match ResourceAddress::parse(s) {
            Err(BenchError::AddressFormat { address, .. }) => assert_eq!(address, s),
            other => panic!("{s}: expected AddressFormat error, got {other:?}"),
        }
    }

    #[test]
    fn test_gpib_primary_only() {
        let addr = parse_ok("GPIB0::14::INSTR");
        assert_eq!(
            addr,
            ResourceAddress::Gpib {
                board: 0,
                primary: 14,
                secondary: None
            }
        );
        assert_eq!(addr.kind(), TransportKind::Gpib);
    }

    #[test]
    fn test_gpib_with_secondary_and_no_board() {
        let addr = parse_ok("gpib::5::2::instr");
        assert_eq!(
            addr,
            ResourceAddress::Gpib {
                board: 0,
                primary: 5,
                secondary: Some(2)
            }
        );
        assert_eq!(addr.to_string(), "GPIB0::5::2::INSTR");
    }

    #[test]
    fn test_gpib_address_out_of_range() {
        assert_format_error("GPIB0::31::INSTR");
        assert_format_error("GPIB0::4::99::INSTR");
    }

    #[test]
    fn test_usb_hex_ids() {
        let addr = parse_ok("USB0::0x1698::0x0837::002000000655::INSTR");
        assert_eq!(
            addr,
            ResourceAddress::Usb {
                board: 0,
                vendor_id: 0x1698,
                product_id: 0x0837,
                serial: "002000000655".into(),
                interface: None,
            }
        );
        assert_eq!(addr.kind(), TransportKind::Usb);
        assert_eq!(addr.to_string(), "USB0::0x1698::0x0837::002000000655::INSTR");
    }

    #[test]
    fn test_usb_bare_ids_are_hex() {
        let addr = parse_ok("USB0::0957::0607::MY12345678::INSTR");
        assert!(matches!(
            addr,
            ResourceAddress::Usb { vendor_id: 0x0957, product_id: 0x0607, .. }
        ));
        assert_eq!(addr.to_string(), "USB0::0x0957::0x0607::MY12345678::INSTR");
        assert_format_error("USB0::0x::0607::MY12345678::INSTR");
        assert_format_error("USB0::+957::0607::MY12345678::INSTR");
        assert_format_error("USB0::10000::0607::MY12345678::INSTR");
    }

    #[test]
    fn test_numeric_fields_must_be_plain_digits() {
        assert_format_error("GPIB+1::5::INSTR");
        assert_format_error("GPIB-1::5::INSTR");
        assert_format_error("GPIB0::+5::INSTR");
        assert_format_error("USB0::0x0957::0x0607::MY12345678::+0::INSTR");
        assert_format_error("TCPIP0::10.0.0.5::+5025::SOCKET");
        assert_eq!(parse_ok("GPIB12::5::INSTR").to_string(), "GPIB12::5::INSTR");
    }

    #[test]
    fn test_usb_with_interface_number() {
        let addr = parse_ok("USB1::0x1AB1::0x04CE::DS1ZA123456789::0::INSTR");
        assert!(matches!(addr, ResourceAddress::Usb { board: 1, interface: Some(0), .. }));
    }

    #[test]
    fn test_tcpip_instr() {
        let addr = parse_ok("TCPIP0::192.168.0.10::inst0::INSTR");
        assert_eq!(
            addr,
            ResourceAddress::TcpipInstr {
                board: 0,
                host: "192.168.0.10".into(),
                device: "inst0".into(),
            }
        );
        assert_eq!(addr.kind(), TransportKind::Tcpip);
        assert!(addr.socket_target().is_none());
    }

    #[test]
    fn test_tcpip_socket() {
        let addr = parse_ok("TCPIP::scope.lab::5025::SOCKET");
        assert_eq!(addr.socket_target(), Some(("scope.lab", 5025)));
        assert_eq!(addr.to_string(), "TCPIP0::scope.lab::5025::SOCKET");
    }

    #[test]
    fn test_serial_port_forms() {
        assert_eq!(
            parse_ok("ASRL3::INSTR"),
            ResourceAddress::Serial { port: "3".into() }
        );
        assert_eq!(
            parse_ok("ASRL/dev/ttyUSB0::INSTR"),
            ResourceAddress::Serial {
                port: "/dev/ttyUSB0".into()
            }
        );
    }

    #[test]
    fn test_bare_socket() {
        let addr = parse_ok("10.0.0.5:5025");
        assert_eq!(addr.kind(), TransportKind::Socket);
        assert_eq!(addr.socket_target(), Some(("10.0.0.5", 5025)));
    }

    #[test]
    fn test_ipv6_socket() {
        let addr = parse_ok("[::1]:5025");
        assert_eq!(addr.socket_target(), Some(("::1", 5025)));
        assert_eq!(addr.to_string(), "[::1]:5025");
    }

    #[test]
    fn test_missing_instr_suffix() {
        assert_format_error("GPIB0::14");
        assert_format_error("USB0::0x1698::0x0837::SER::RAW");
        assert_format_error("TCPIP0::10.0.0.1::inst0::FOO");
    }

    #[test]
    fn test_wrong_field_count() {
        assert_format_error("GPIB0::1::2::3::INSTR");
        assert_format_error("USB0::0x1698::INSTR");
        assert_format_error("TCPIP0::10.0.0.1::INSTR");
        assert_format_error("ASRL1::2::INSTR");
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert_format_error("");
        assert_format_error("   ");
        assert_format_error("PXI0::1::INSTR");
        assert_format_error("localhost");
        assert_format_error("localhost:notaport");
        assert_format_error("host:0");
        assert_format_error("GPIB0::::INSTR");
        assert_format_error("GPIBx::1::INSTR");
    }

    #[test]
    fn test_every_valid_form_has_one_kind() {
        let cases = [
            ("GPIB0::14::INSTR", TransportKind::Gpib),
            ("USB0::0x1698::0x0837::SN1::INSTR", TransportKind::Usb),
            ("TCPIP0::host::inst0::INSTR", TransportKind::Tcpip),
            ("TCPIP0::host::5025::SOCKET", TransportKind::Tcpip),
            ("ASRL1::INSTR", TransportKind::Serial),
            ("host:5025", TransportKind::Socket),
        ];
        for (raw, kind) in cases {
            let addr: ResourceAddress = raw.parse().unwrap();
            assert_eq!(addr.kind(), kind, "{raw}");
            // Canonical form parses back to the same address.
            assert_eq!(ResourceAddress::parse(&addr.to_string()).unwrap(), addr);
        }
    }
}
