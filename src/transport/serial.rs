// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use std::{collections::BTreeMap, time::Duration};

use serde::Serialize;
use tokio_serial::{SerialPortBuilderExt as _, SerialPortType, SerialStream};
use tracing::{debug, trace};

use super::{Connection, LinkInfo, LinkKind};
pub use super::{CONTROL_BAUD, DATA_BAUD};
use crate::error::TransportError;

/// Silicon Labs USB vendor id.
pub const CP2105_VID: u16 = 0x10C4;
/// CP2105 dual UART product id.
pub const CP2105_PID: u16 = 0xEA70;

const CONTROL_TIMEOUT: Duration = Duration::from_millis(500);
const DATA_TIMEOUT: Duration = Duration::from_millis(100);

/// A USB serial port exposed by a CP2105 bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortCandidate {
    /// Device path
    pub path: String,
    /// USB serial number of the bridge
    pub serial_number: Option<String>,
    /// USB product or interface description
    pub description: Option<String>,
}

/// The control and data port of one board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RadarPorts {
    /// Command port path
    pub control: String,
    /// Frame data port path
    pub data: String,
    /// USB serial number of the bridge
    pub serial_number: Option<String>,
}

/// Lists serial ports belonging to CP2105 bridges.
pub fn list_ports() -> Result<Vec<PortCandidate>, TransportError> {
    let ports = tokio_serial::available_ports()?;
    let candidates = ports
        .into_iter()
        .filter_map(|port| match port.port_type {
            SerialPortType::UsbPort(usb) if usb.vid == CP2105_VID && usb.pid == CP2105_PID => {
                Some(PortCandidate {
                    path: normalize_path(&port.port_name),
                    serial_number: usb.serial_number,
                    description: usb.product,
                })
            }
            _ => None,
        })
        .collect::<Vec<_>>();
    debug!("found {} CP2105 ports", candidates.len());
    Ok(candidates)
}

/// macOS lists each port twice, the callout device is not usable here.
fn normalize_path(path: &str) -> String {
    path.replacen("/dev/cu.", "/dev/tty.", 1)
}

/// Finds every board, optionally only the one with `serial_number`.
pub fn discover(serial_number: Option<&str>) -> Result<Vec<RadarPorts>, TransportError> {
    let boards = classify(&list_ports()?, serial_number);
    if boards.is_empty() {
        return Err(TransportError::NotFound(match serial_number {
            Some(sn) => format!("no CP2105 ports with serial number {sn}"),
            None => "no CP2105 ports".to_string(),
        }));
    }
    Ok(boards)
}

/// Groups ports by USB serial number and assigns the control and data role
/// within each group.  The "Enhanced" interface is the control port and the
/// "Standard" interface the data port, without descriptions the lower path
/// is the control port.
pub fn classify(candidates: &[PortCandidate], serial_number: Option<&str>) -> Vec<RadarPorts> {
    let mut groups: BTreeMap<Option<&str>, Vec<&PortCandidate>> = BTreeMap::new();
    for candidate in candidates {
        let sn = candidate.serial_number.as_deref();
        if serial_number.is_some() && sn != serial_number {
            continue;
        }
        groups.entry(sn).or_default().push(candidate);
    }

    let mut boards = Vec::new();
    for (sn, mut ports) in groups {
        if ports.len() < 2 {
            trace!("skipping incomplete port group {:?}", sn);
            continue;
        }
        ports.sort_by(|a, b| a.path.cmp(&b.path));
        let described = |needle: &str| {
            ports
                .iter()
                .find(|p| p.description.as_deref().is_some_and(|d| d.contains(needle)))
                .map(|p| p.path.clone())
        };
        let control = described("Enhanced").unwrap_or_else(|| ports[0].path.clone());
        let data = described("Standard")
            .or_else(|| ports.iter().find(|p| p.path != control).map(|p| p.path.clone()))
            .unwrap_or_else(|| ports[1].path.clone());
        boards.push(RadarPorts {
            control,
            data,
            serial_number: sn.map(str::to_string),
        });
    }
    boards
}

/// Opens a serial port on the current tokio runtime.
pub fn open_port(path: &str, baud: u32) -> Result<SerialStream, TransportError> {
    let port = tokio_serial::new(path, baud)
        .data_bits(tokio_serial::DataBits::Eight)
        .parity(tokio_serial::Parity::None)
        .stop_bits(tokio_serial::StopBits::One)
        .flow_control(tokio_serial::FlowControl::None)
        .open_native_async()?;
    Ok(port)
}

/// Opens both ports of a board.
pub fn open(
    ports: &RadarPorts,
    control_baud: u32,
    data_baud: u32,
) -> Result<Connection, TransportError> {
    let control = open_port(&ports.control, control_baud)?;
    let data = open_port(&ports.data, data_baud)?;
    let info = LinkInfo {
        kind: LinkKind::Serial,
        control: ports.control.clone(),
        data: ports.data.clone(),
        data_baud: Some(data_baud),
        serial_number: ports.serial_number.clone(),
    };
    let mut conn = Connection::from_streams(control, data, info, CONTROL_TIMEOUT);
    conn.data.set_timeout(DATA_TIMEOUT);
    Ok(conn)
}
