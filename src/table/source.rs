//! 数据块来源
//!
//! 逐块读取每DUT的轨迹表，保证同一事件的行不会被切分到两个数据块中。

use super::record::TrackRecord;
use crate::error::{AnalysisError, AnalysisResult, format_error};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// 数据块来源trait
///
/// # 约定
///
/// - **事件原子性**：同一 `event_number` 的所有行位于同一数据块
/// - **变长块**：块大小至少为 `chunk_size`（最后一块除外），为保持事件完整可略大
/// - **EOF 语义**：返回 `None` 后再次调用应继续返回 `None`
/// - **单线程消费**：按顺序逐块消费，"第一块确定分bin"依赖该顺序
pub trait TrackChunkSource {
    /// 获取下一个数据块
    fn next_chunk(&mut self) -> AnalysisResult<Option<Vec<TrackRecord>>>;

    /// 已读取的行数
    fn rows_read(&self) -> u64;
}

fn ensure_event_order(previous: Option<i64>, next: i64, row: u64) -> AnalysisResult<()> {
    match previous {
        Some(prev) if next < prev => Err(AnalysisError::FormatError(format!(
            "轨迹表未按事件排序: 第{row}行 event_number={next} < {prev}"
        ))),
        _ => Ok(()),
    }
}

/// 内存中的轨迹表
#[derive(Debug, Clone)]
pub struct MemoryTrackSource {
    rows: Vec<TrackRecord>,
    position: usize,
    chunk_size: usize,
}

impl MemoryTrackSource {
    pub fn new(rows: Vec<TrackRecord>, chunk_size: usize) -> AnalysisResult<Self> {
        if chunk_size == 0 {
            return Err(AnalysisError::InvalidInput("chunk_size 必须大于0".to_string()));
        }
        let mut previous = None;
        for (i, row) in rows.iter().enumerate() {
            ensure_event_order(previous, row.event_number, i as u64 + 1)?;
            previous = Some(row.event_number);
        }
        Ok(Self {
            rows,
            position: 0,
            chunk_size,
        })
    }
}

impl TrackChunkSource for MemoryTrackSource {
    fn next_chunk(&mut self) -> AnalysisResult<Option<Vec<TrackRecord>>> {
        if self.position >= self.rows.len() {
            return Ok(None);
        }
        let mut end = (self.position + self.chunk_size).min(self.rows.len());
        // 扩展到事件边界
        while end < self.rows.len() && self.rows[end].event_number == self.rows[end - 1].event_number
        {
            end += 1;
        }
        let chunk = self.rows[self.position..end].to_vec();
        self.position = end;
        Ok(Some(chunk))
    }

    fn rows_read(&self) -> u64 {
        self.position as u64
    }
}

/// JSON Lines 轨迹表读取器（每行一条记录）
pub struct JsonlTrackReader<R: BufRead> {
    reader: R,
    chunk_size: usize,
    pending: Option<TrackRecord>,
    line_number: u64,
    rows_read: u64,
    last_event: Option<i64>,
    finished: bool,
    buffer: String,
}

impl JsonlTrackReader<BufReader<File>> {
    /// 打开轨迹表文件
    pub fn open(path: &Path, chunk_size: usize) -> AnalysisResult<Self> {
        let file = File::open(path)?;
        Self::new(BufReader::new(file), chunk_size)
    }
}

impl<R: BufRead> JsonlTrackReader<R> {
    pub fn new(reader: R, chunk_size: usize) -> AnalysisResult<Self> {
        if chunk_size == 0 {
            return Err(AnalysisError::InvalidInput("chunk_size 必须大于0".to_string()));
        }
        Ok(Self {
            reader,
            chunk_size,
            pending: None,
            line_number: 0,
            rows_read: 0,
            last_event: None,
            finished: false,
            buffer: String::new(),
        })
    }

    /// 读取下一条记录（跳过空行）
    fn read_record(&mut self) -> AnalysisResult<Option<TrackRecord>> {
        if let Some(record) = self.pending.take() {
            return Ok(Some(record));
        }
        loop {
            self.buffer.clear();
            if self.reader.read_line(&mut self.buffer)? == 0 {
                return Ok(None);
            }
            self.line_number += 1;
            let line = self.buffer.trim();
            if line.is_empty() {
                continue;
            }
            let record: TrackRecord = serde_json::from_str(line)
                .map_err(|e| format_error(&format!("第{}行", self.line_number), e))?;
            ensure_event_order(self.last_event, record.event_number, self.line_number)?;
            self.last_event = Some(record.event_number);
            return Ok(Some(record));
        }
    }
}

impl<R: BufRead> TrackChunkSource for JsonlTrackReader<R> {
    fn next_chunk(&mut self) -> AnalysisResult<Option<Vec<TrackRecord>>> {
        if self.finished {
            return Ok(None);
        }
        let mut chunk: Vec<TrackRecord> = Vec::with_capacity(self.chunk_size);

        while let Some(record) = self.read_record()? {
            let boundary = chunk.len() >= self.chunk_size
                && chunk
                    .last()
                    .is_some_and(|last| last.event_number != record.event_number);
            if boundary {
                self.pending = Some(record);
                break;
            }
            chunk.push(record);
        }

        if chunk.is_empty() {
            self.finished = true;
            return Ok(None);
        }
        self.rows_read += chunk.len() as u64;
        Ok(Some(chunk))
    }

    fn rows_read(&self) -> u64 {
        self.rows_read
    }
}
