//! RS-232 transport built on the `serialport` crate.

use std::time::Duration;

use tracing::info;

use super::{FramedIo, Framing};
use crate::error::TransportError;

/// Serial port with line framing.
pub type SerialTransport = FramedIo<Box<dyn serialport::SerialPort>>;

/// Internal read timeout of the port. The overall exchange timeout is enforced by
/// [`FramedIo`].
const PORT_POLL: Duration = Duration::from_millis(100);

/// Open `port_name` at `baud_rate`, 8N1, no flow control.
///
/// # Arguments
/// * `port_name` - Serial port path (e.g., "/dev/ttyUSB0", "COM3")
/// * `baud_rate` - Communication speed (e.g., 9600, 115200)
pub fn open_serial(
    port_name: &str,
    baud_rate: u32,
    framing: Framing,
    timeout: Duration,
) -> Result<SerialTransport, TransportError> {
    let port = serialport::new(port_name, baud_rate)
        .data_bits(serialport::DataBits::Eight)
        .parity(serialport::Parity::None)
        .stop_bits(serialport::StopBits::One)
        .flow_control(serialport::FlowControl::None)
        .timeout(PORT_POLL)
        .open()?;

    info!(port = port_name, baud_rate, "Serial port opened");
    Ok(FramedIo::new(port, framing, timeout))
}
