//! 会话缓冲区 - 累积会话期间看到的全部原始字节

use super::sanitizer::sanitize;

/// 会话原始字节缓冲（只追加，不淘汰）
#[derive(Debug, Default)]
pub struct SessionBuffer {
    raw: Vec<u8>,
}

impl SessionBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一段输入或输出
    pub fn append(&mut self, chunk: &[u8]) {
        self.raw.extend_from_slice(chunk);
    }

    /// 已捕获字节数
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// 拷贝当前内容，供其他任务渲染
    pub fn snapshot(&self) -> BufferSnapshot {
        BufferSnapshot {
            raw: self.raw.clone(),
        }
    }
}

/// 某一时刻的缓冲区内容
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BufferSnapshot {
    pub raw: Vec<u8>,
}

impl BufferSnapshot {
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// 清洗后的视图，每次调用重新计算
    pub fn clean(&self) -> String {
        sanitize(&self.raw)
    }
}

/// 取视图的最后 `n` 个字符
pub fn tail(view: &str, n: usize) -> &str {
    let count = view.chars().count();
    if count <= n {
        return view;
    }
    let skip = count - n;
    match view.char_indices().nth(skip) {
        Some((idx, _)) => &view[idx..],
        None => "",
    }
}
