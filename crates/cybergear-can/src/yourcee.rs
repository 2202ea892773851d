//! YourCee 型 USB 转 CAN 适配器
//!
//! 串口封包固定 17 字节，"AT" 指令风格：
//!
//! ```text
//! [0x41, 0x54][(ID << 3) | 0x04 大端 4 字节][0x08][数据 8 字节][0x0D, 0x0A]
//! ```
//!
//! 低 3 位 0b100 标记扩展数据帧，CRLF 结尾兼作完整性校验。

use crate::{CanAdapter, CanError, DEFAULT_PORT_TIMEOUT_MS};
use cybergear_protocol::CgFrame;
use serialport::SerialPort;
use std::io::{Read, Write};
use std::time::{Duration, Instant};
use tracing::{info, trace, warn};

/// 封包总长
pub const FRAME_SIZE: usize = 17;
/// 帧头 "AT"
const HEADER: [u8; 2] = [0x41, 0x54];
/// ID 字段低 3 位：扩展数据帧标记
const EXT_DATA_FLAG: u32 = 0x04;

/// CAN 帧 → 串口封包
pub fn pack_frame(frame: &CgFrame) -> [u8; FRAME_SIZE] {
    let raw = (frame.id << 3) | EXT_DATA_FLAG;
    let mut buf = [0u8; FRAME_SIZE];
    buf[0..2].copy_from_slice(&HEADER);
    buf[2..6].copy_from_slice(&raw.to_be_bytes());
    buf[6] = 0x08;
    buf[7..15].copy_from_slice(&frame.data);
    buf[15] = 0x0D;
    buf[16] = 0x0A;
    buf
}

/// 串口封包 → CAN 帧
pub fn unpack_frame(buf: &[u8; FRAME_SIZE]) -> Result<CgFrame, CanError> {
    if buf[0..2] != HEADER {
        return Err(CanError::Checksum {
            reason: "missing AT header",
        });
    }
    if buf[15] != 0x0D || buf[16] != 0x0A {
        return Err(CanError::Checksum {
            reason: "missing CRLF terminator",
        });
    }
    if buf[6] != 0x08 {
        return Err(CanError::Checksum {
            reason: "bad YourCee DLC",
        });
    }
    let raw = u32::from_be_bytes([buf[2], buf[3], buf[4], buf[5]]);
    if raw & 0x07 != EXT_DATA_FLAG {
        return Err(CanError::Checksum {
            reason: "not an extended data frame",
        });
    }

    Ok(CgFrame::new(raw >> 3, &buf[7..15]))
}

/// 字节流 → 帧的重同步缓冲
#[derive(Debug, Default)]
pub struct YourCeeFramer {
    buf: Vec<u8>,
    dropped: u64,
}

impl YourCeeFramer {
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
            let pos = match self
                .buf
                .windows(2)
                .position(|w| w == HEADER)
            {
                Some(pos) => pos,
                None => {
                    // 最后一个字节可能是下一个帧头的前半截，留下
                    let keep = usize::from(self.buf.last() == Some(&HEADER[0]));
                    let drop = self.buf.len() - keep;
                    self.dropped += drop as u64;
                    self.buf.drain(..drop);
                    return None;
                }
            };
            if pos > 0 {
                warn!(bytes = pos, "discarding garbage before AT header");
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
                    warn!(error = %e, "dropping corrupted YourCee frame");
                    self.dropped += 1;
                    self.buf.drain(..1);
                }
            }
        }
    }
}

/// YourCee 适配器
pub struct YourCeeCanAdapter {
    port: Box<dyn SerialPort>,
    framer: YourCeeFramer,
}

impl YourCeeCanAdapter {
    /// 打开串口
    pub fn open(port_name: &str, baud_rate: u32) -> Result<Self, CanError> {
        let port = serialport::new(port_name, baud_rate)
            .timeout(Duration::from_millis(DEFAULT_PORT_TIMEOUT_MS))
            .open()?;
        info!(port = port_name, baud = baud_rate, "YourCee adapter opened");

        Ok(Self {
            port,
            framer: YourCeeFramer::default(),
        })
    }
}

impl CanAdapter for YourCeeCanAdapter {
    fn send(&mut self, frame: &CgFrame) -> Result<(), CanError> {
        trace!("YourCee tx 0x{:08X}", frame.id);
        self.port.write_all(&pack_frame(frame))?;
        self.port.flush()?;
        Ok(())
    }

    fn receive(&mut self, timeout: Duration) -> Result<CgFrame, CanError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(frame) = self.framer.next_frame() {
                trace!("YourCee rx 0x{:08X}", frame.id);
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

#[cfg(test)]
mod tests {
    use super::*;

    fn motion_frame() -> CgFrame {
        CgFrame::new(
            0x0180_0001,
            &[0x8F, 0xFD, 0x88, 0x88, 0x00, 0x00, 0x00, 0x00],
        )
    }

    #[test]
    fn test_pack_golden_bytes() {
        let packed = pack_frame(&motion_frame());
        assert_eq!(
            packed,
            [
                0x41, 0x54, 0x0C, 0x00, 0x00, 0x0C, 0x08, 0x8F, 0xFD, 0x88, 0x88, 0x00, 0x00,
                0x00, 0x00, 0x0D, 0x0A
            ]
        );
    }

    #[test]
    fn test_pack_unpack_roundtrip() {
        let frame = motion_frame();
        let back = unpack_frame(&pack_frame(&frame)).unwrap();
        assert_eq!(back, frame);

        // 29 bit 全 1 的边界
        let frame = CgFrame::new(0x1FFF_FFFF, &[0xFF; 8]);
        assert_eq!(unpack_frame(&pack_frame(&frame)).unwrap(), frame);
    }

    #[test]
    fn test_unpack_rejects_missing_terminator() {
        let mut buf = pack_frame(&motion_frame());
        buf[16] = 0x00;
        match unpack_frame(&buf) {
            Err(CanError::Checksum { reason }) => assert!(reason.contains("CRLF")),
            other => panic!("expected Checksum, got {other:?}"),
        }
    }

    #[test]
    fn test_unpack_rejects_standard_frame_flag() {
        let mut buf = pack_frame(&motion_frame());
        buf[5] &= !0x04; // 清掉扩展帧标记
        assert!(matches!(unpack_frame(&buf), Err(CanError::Checksum { .. })));
    }

    #[test]
    fn test_framer_resyncs_after_garbage() {
        let mut framer = YourCeeFramer::default();
        framer.extend(&[0x41, 0x00, 0xFF]); // 半截帧头 + 垃圾
        framer.extend(&pack_frame(&motion_frame()));

        assert_eq!(framer.next_frame().unwrap(), motion_frame());
        assert_eq!(framer.dropped_bytes(), 3);
    }

    #[test]
    fn test_framer_drops_corrupted_frame_and_continues() {
        let mut corrupted = pack_frame(&motion_frame());
        corrupted[15] = 0x00; // 结尾被破坏

        let mut framer = YourCeeFramer::default();
        framer.extend(&corrupted);
        framer.extend(&pack_frame(&motion_frame()));

        assert_eq!(framer.next_frame().unwrap(), motion_frame());
        assert!(framer.dropped_bytes() >= FRAME_SIZE as u64);
    }

    #[test]
    fn test_framer_keeps_partial_header() {
        let mut framer = YourCeeFramer::default();
        framer.extend(&[0x00, 0x41]); // 垃圾 + 可能的帧头前半截
        assert!(framer.next_frame().is_none());
        assert_eq!(framer.dropped_bytes(), 1);

        let packed = pack_frame(&motion_frame());
        framer.extend(&packed[1..]); // 补上 0x54 和剩余内容
        assert_eq!(framer.next_frame().unwrap(), motion_frame());
    }
}
