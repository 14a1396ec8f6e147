//! 反馈字节流分帧器
//!
//! 反馈端口发送的是首尾相接的 JSON 对象：`{"len": ...}{"len": ...}...`，
//! 一次 `read` 可能只拿到半个对象，也可能拿到多个对象。
//!
//! 分帧规则：以标记 `{"len":` 定位帧头，找到**下一帧**的帧头时，
//! 两个帧头之间的字节即为一个完整帧。第一个帧头之前的字节被丢弃。

use bytes::{Bytes, BytesMut};

/// 帧头标记
pub const FRAME_MARKER: &[u8] = br#"{"len":"#;

/// 单帧允许的最大字节数，超出后丢弃缓冲区
pub const MAX_PENDING_BYTES: usize = 64 * 1024;

/// 反馈字节流分帧器
///
/// 只做分帧，不做 JSON 解码。帧头之后超过 `max_pending` 字节仍未出现下一帧头时，
/// 缓冲区被丢弃（只保留可能是半个帧头的尾部），丢弃的字节数由
/// [`take_discarded`](Self::take_discarded) 取出。
#[derive(Debug)]
pub struct FrameSplitter {
    buffer: BytesMut,
    /// 缓冲区是否以帧头开始
    anchored: bool,
    /// 下一次查找帧头的起点
    scanned: usize,
    max_pending: usize,
    discarded: usize,
}

impl Default for FrameSplitter {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSplitter {
    pub fn new() -> Self {
        Self::with_limit(MAX_PENDING_BYTES)
    }

    pub fn with_limit(max_pending: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(8 * 1024),
            anchored: false,
            scanned: 0,
            max_pending: max_pending.max(FRAME_MARKER.len()),
            discarded: 0,
        }
    }

    /// 追加新读到的字节
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// 取出下一个完整帧
    ///
    /// 缓冲区中尚未出现下一帧的帧头时返回 `None`（最后一帧保留在缓冲区中）。
    pub fn next_frame(&mut self) -> Option<Bytes> {
        if !self.anchored {
            match find_marker(&self.buffer, self.scanned) {
                Some(start) => {
                    // 帧头之前的残余字节
                    let _ = self.buffer.split_to(start);
                    self.anchored = true;
                    self.scanned = 1;
                },
                None => {
                    self.keep_tail();
                    return None;
                },
            }
        }

        match find_marker(&self.buffer, self.scanned) {
            Some(next) => {
                let frame = self.buffer.split_to(next).freeze();
                self.scanned = 1;
                Some(frame)
            },
            None => {
                if self.buffer.len() > self.max_pending {
                    let dropped = self.keep_tail();
                    self.discarded += dropped;
                    self.anchored = false;
                } else {
                    self.scanned = self
                        .buffer
                        .len()
                        .saturating_sub(FRAME_MARKER.len() - 1)
                        .max(1);
                }
                None
            },
        }
    }

    /// 清空缓冲区（断线重连时调用）
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.anchored = false;
        self.scanned = 0;
    }

    /// 缓冲区中待处理的字节数
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// 取出并清零因超长而丢弃的字节数
    pub fn take_discarded(&mut self) -> usize {
        std::mem::take(&mut self.discarded)
    }

    /// 只保留可能是半个帧头的尾部，返回丢弃的字节数
    fn keep_tail(&mut self) -> usize {
        let excess = self.buffer.len().saturating_sub(FRAME_MARKER.len() - 1);
        let _ = self.buffer.split_to(excess);
        self.scanned = 0;
        excess
    }
}

fn find_marker(haystack: &[u8], from: usize) -> Option<usize> {
    if haystack.len() < from + FRAME_MARKER.len() {
        return None;
    }
    haystack[from..]
        .windows(FRAME_MARKER.len())
        .position(|w| w == FRAME_MARKER)
        .map(|pos| pos + from)
}
