//! DR 型 USB 转 CAN 适配器
//!
//! 串口封包固定 16 字节：
//!
//! ```text
//! [0xAA, 0x01, 0x00, 0x08][29-bit ID 大端 4 字节][数据 8 字节]
//! ```

use crate::{CanAdapter, CanError, DEFAULT_PORT_TIMEOUT_MS};
use cybergear_protocol::{CAN_EFF_MASK, CgFrame};
use serialport::SerialPort;
use std::io::{Read, Write};
use std::time::{Duration, Instant};
use tracing::{info, trace, warn};

/// 封包总长
pub const FRAME_SIZE: usize = 16;
/// 帧头字节
const HEADER: u8 = 0xAA;

/// CAN 帧 → 串口封包
pub fn pack_frame(frame: &CgFrame) -> [u8; FRAME_SIZE] {
    let mut buf = [0u8; FRAME_SIZE];
    buf[0] = HEADER;
    buf[1] = 0x01;
    buf[2] = 0x00;
    buf[3] = 0x08;
    buf[4..8].copy_from_slice(&frame.id.to_be_bytes());
    buf[8..16].copy_from_slice(&frame.data);
    buf
}

/// 串口封包 → CAN 帧
///
/// 固定字节不符即视为封包损坏。
pub fn unpack_frame(buf: &[u8; FRAME_SIZE]) -> Result<CgFrame, CanError> {
    if buf[0] != HEADER {
        return Err(CanError::Checksum {
            reason: "missing DR header",
        });
    }
    if buf[1] != 0x01 || buf[2] != 0x00 {
        return Err(CanError::Checksum {
            reason: "bad DR header bytes",
        });
    }
    if buf[3] != 0x08 {
        return Err(CanError::Checksum {
            reason: "bad DR DLC",
        });
    }
    let id = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
    if id > CAN_EFF_MASK {
        return Err(CanError::Checksum {
            reason: "identifier exceeds 29 bits",
        });
    }

    Ok(CgFrame::new(id, &buf[8..16]))
}

/// 字节流 → 帧的重同步缓冲
///
/// 损坏的封包逐字节丢弃直到下一个帧头，总线噪声不会中断读取。
#[derive(Debug, Default)]
pub struct DrFramer {
    buf: Vec<u8>,
    dropped: u64,
}

impl DrFramer {
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// 累计丢弃的字节数
    pub fn dropped_bytes(&self) -> u64 {
        self.dropped
    }

    /// 尝试取出下一个完整帧
    pub fn next_frame(&mut self) -> Option<CgFrame> {
        loop {
            let pos = match self.buf.iter().position(|&b| b == HEADER) {
                Some(pos) => pos,
                None => {
                    self.dropped += self.buf.len() as u64;
                    self.buf.clear();
                    return None;
                }
            };
            if pos > 0 {
                warn!(bytes = pos, "discarding garbage before DR header");
                self.dropped += pos as u64;
                self.buf.drain(..pos);
            }
            if self.buf.len() < FRAME_SIZE {
                return None;
            }

            let mut chunk = [0u8; FRAME_SIZE];
            chunk.copy_from_slice(&self.buf[..FRAME_SIZE]);
            match unpack_frame(&chunk) {
                Ok(frame) => {
                    self.buf.drain(..FRAME_SIZE);
                    return Some(frame);
                }
                Err(e) => {
                    // 帧头命中但封包损坏：丢一个字节重新同步
                    warn!(error = %e, "dropping corrupted DR frame");
                    self.dropped += 1;
                    self.buf.drain(..1);
                }
            }
        }
    }
}

/// DR 适配器
pub struct DrCanAdapter {
    port: Box<dyn SerialPort>,
    framer: DrFramer,
}

impl DrCanAdapter {
    /// 打开串口
    pub fn open(port_name: &str, baud_rate: u32) -> Result<Self, CanError> {
        let port = serialport::new(port_name, baud_rate)
            .timeout(Duration::from_millis(DEFAULT_PORT_TIMEOUT_MS))
            .open()?;
        info!(port = port_name, baud = baud_rate, "DR adapter opened");

        Ok(Self {
            port,
            framer: DrFramer::default(),
        })
    }
}

impl CanAdapter for DrCanAdapter {
    fn send(&mut self, frame: &CgFrame) -> Result<(), CanError> {
        trace!("DR tx 0x{:08X}", frame.id);
        self.port.write_all(&pack_frame(frame))?;
        self.port.flush()?;
        Ok(())
    }

    fn receive(&mut self, timeout: Duration) -> Result<CgFrame, CanError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(frame) = self.framer.next_frame() {
                trace!("DR rx 0x{:08X}", frame.id);
                return Ok(frame);
            }

            let remaining = match deadline.checked_duration_since(Instant::now()) {
                Some(d) if !d.is_zero() => d,
                _ => return Err(CanError::Timeout),
            };
            self.port.set_timeout(remaining)?;

            let mut chunk = [0u8; 64];
            match self.port.read(&mut chunk) {
                Ok(0) => {
                    return Err(CanError::Io(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "serial port returned EOF",
                    )));
                }
                Ok(n) => self.framer.extend(&chunk[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                    return Err(CanError::Timeout);
                }
                Err(e) => return Err(CanError::Io(e)),
            }
        }
    }
}
