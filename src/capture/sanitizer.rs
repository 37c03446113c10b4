//! 控制序列清洗 - 从原始终端字节流得到可读文本
//!
//! 处理流程：
//! 1. 状态机剥离 ESC 序列（CSI / OSC / 其他），丢弃不可打印字节
//! 2. 反复移除 Claude Code UI 残留碎片（`[<u`、`<u`、`[?2004h`），直到不再变化
//! 3. 统一换行、逐行 trim、折叠 3 个以上连续换行
//!
//! 清洗从不失败，且再次清洗结果不变。

const ESC: u8 = 0x1b;
const BEL: u8 = 0x07;

/// 扫描状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Ground,
    /// 刚读到 ESC
    Escape,
    /// `ESC` + 中间字节（如 `ESC ( B`）
    EscapeIntermediate,
    /// `ESC [` 参数区
    Csi,
    /// `ESC ]` 等字符串区，以 BEL 或 `ESC \` 结束
    Osc,
    /// OSC 内部读到 ESC
    OscEscape,
}

/// 清洗原始字节
pub fn sanitize(input: &[u8]) -> String {
    let stripped = strip_sequences(input);
    let cleaned = remove_fragments(stripped);
    normalize_lines(&cleaned)
}

/// 清洗文本（便捷封装）
pub fn sanitize_str(input: &str) -> String {
    sanitize(input.as_bytes())
}

fn is_kept(byte: u8) -> bool {
    matches!(byte, 0x20..=0x7e | b'\n' | b'\r' | b'\t')
}

fn strip_sequences(input: &[u8]) -> String {
    let mut out = String::with_capacity(input.len());
    let mut state = ScanState::Ground;
    for &byte in input {
        state = step(state, byte, &mut out);
    }
    out
}

fn step(state: ScanState, byte: u8, out: &mut String) -> ScanState {
    use ScanState::*;

    match state {
        Ground => ground(byte, out),
        Escape => match byte {
            b'[' => Csi,
            // OSC 以及 DCS / SOS / PM / APC 都是以 ST 结束的字符串
            b']' | b'P' | b'X' | b'^' | b'_' => Osc,
            ESC => Escape,
            0x20..=0x2f => EscapeIntermediate,
            0x30..=0x7e => Ground,
            // 序列被截断，按普通字节重新处理
            _ => ground(byte, out),
        },
        EscapeIntermediate => match byte {
            0x20..=0x2f => EscapeIntermediate,
            0x30..=0x7e => Ground,
            _ => ground(byte, out),
        },
        Csi => match byte {
            // 参数字节 0x30-0x3f（含 `<` `?` `;`）与中间字节 0x20-0x2f
            0x20..=0x3f => Csi,
            0x40..=0x7e => Ground,
            _ => ground(byte, out),
        },
        Osc => match byte {
            BEL => Ground,
            ESC => OscEscape,
            // 未终止的 OSC 不跨行
            b'\n' => ground(byte, out),
            _ => Osc,
        },
        OscEscape => match byte {
            b'\\' => Ground,
            _ => step(Escape, byte, out),
        },
    }
}

fn ground(byte: u8, out: &mut String) -> ScanState {
    if byte == ESC {
        return ScanState::Escape;
    }
    if is_kept(byte) {
        out.push(byte as char);
    }
    ScanState::Ground
}

/// 移除碎片直到不动点（移除后两侧可能拼出新的碎片）
fn remove_fragments(mut text: String) -> String {
    loop {
        let next = strip_fragments_once(&text);
        if next.len() == text.len() {
            return next;
        }
        text = next;
    }
}

fn strip_fragments_once(text: &str) -> String {
    // 第一阶段之后只剩 ASCII
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < bytes.len() {
        match fragment_len(&bytes[i..]) {
            0 => {
                out.push(bytes[i] as char);
                i += 1;
            }
            len => i += len,
        }
    }
    out
}

/// 返回以当前位置开头的碎片长度，0 表示不是碎片
fn fragment_len(rest: &[u8]) -> usize {
    if rest.starts_with(b"[<u") {
        return 3;
    }
    if rest.starts_with(b"<u") {
        return 2;
    }
    if rest.starts_with(b"[?") {
        let digits = rest[2..].iter().take_while(|b| b.is_ascii_digit()).count();
        if digits > 0 && matches!(rest.get(2 + digits), Some(b'h' | b'l')) {
            return 3 + digits;
        }
    }
    0
}

fn normalize_lines(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");
    let joined = unified
        .split('\n')
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n");

    let mut out = String::with_capacity(joined.len());
    let mut newline_run = 0;
    for c in joined.chars() {
        if c == '\n' {
            newline_run += 1;
            if newline_run > 2 {
                continue;
            }
        } else {
            newline_run = 0;
        }
        out.push(c);
    }
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sgr_and_blank_lines() {
        assert_eq!(
            sanitize_str("\u{1b}[31mHello\u{1b}[0m\n\n\n\nWorld"),
            "Hello\n\nWorld"
        );
    }

    #[test]
    fn test_osc_terminated_by_bel_and_st() {
        assert_eq!(sanitize_str("\u{1b}]0;title\u{7}prompt"), "prompt");
        assert_eq!(sanitize_str("\u{1b}]8;;http://x\u{1b}\\link"), "link");
    }

    #[test]
    fn test_unterminated_osc_stops_at_newline() {
        assert_eq!(sanitize_str("\u{1b}]0;broken title\nnext line"), "next line");
    }

    #[test]
    fn test_private_csi_and_kitty_keyboard() {
        assert_eq!(sanitize_str("\u{1b}[?2004hready\u{1b}[?25l"), "ready");
        assert_eq!(sanitize_str("a\u{1b}[<ub"), "ab");
        assert_eq!(sanitize_str("\u{1b}[>1u\u{1b}[2K\u{1b}[1Gok"), "ok");
    }

    #[test]
    fn test_other_escape_forms() {
        // 字符集选择、保存光标、键盘模式
        assert_eq!(sanitize_str("\u{1b}(Bx\u{1b}7y\u{1b}=z"), "xyz");
    }

    #[test]
    fn test_dcs_string_removed() {
        assert_eq!(sanitize_str("\u{1b}P1$r0m\u{1b}\\tail"), "tail");
    }

    #[test]
    fn test_truncated_escape_is_dropped() {
        assert_eq!(sanitize_str("text\u{1b}[3"), "text");
        assert_eq!(sanitize_str("a\u{1b}\nb"), "a\nb");
    }

    #[test]
    fn test_garbled_fragments() {
        assert_eq!(sanitize_str("x[<uy<uz"), "xyz");
        assert_eq!(sanitize_str("[?2004hhello[?1l"), "hello");
        // 移除后拼出的新碎片也要移除
        assert_eq!(sanitize_str("a<<uub"), "ab");
    }

    #[test]
    fn test_carriage_returns() {
        assert_eq!(sanitize_str("line one\rline two\r"), "line one\nline two");
        assert_eq!(sanitize_str("a\r\nb\r\n"), "a\nb");
    }

    #[test]
    fn test_trims_lines_and_whole_text() {
        assert_eq!(sanitize_str("  \n  foo  \n\t bar\t\n   "), "foo\nbar");
        // 行 trim 后产生的空行也要折叠
        assert_eq!(sanitize_str("a\n   \n  \n \nb"), "a\n\nb");
    }

    #[test]
    fn test_non_printable_and_non_ascii_dropped() {
        assert_eq!(sanitize("a\u{7}b\u{0}c".as_bytes()), "abc");
        assert_eq!(sanitize_str("⏺ done ✓"), "done");
        assert_eq!(sanitize(&[b'o', 0xff, 0xfe, b'k']), "ok");
    }

    #[test]
    fn test_split_sequence_rejoined() {
        let mut joined = b"before \x1b[3".to_vec();
        joined.extend_from_slice(b"8;5;208mafter\x1b[0m");
        assert_eq!(sanitize(&joined), "before after");
    }

    #[test]
    fn test_idempotent_over_corpus() {
        let corpus = [
            "\u{1b}[31mHello\u{1b}[0m\n\n\n\nWorld",
            "\u{1b}]0;t\u{7}\u{1b}[?2004h> hi\r\n\r\n\r\n\r\nthere  ",
            "a<<uub[<<uu c",
            "[?[?1h2004h x",
            "\r\r\n\r  \u{1b}[2J\u{1b}[H╭──╮\n│ x │\n╰──╯",
            "\u{1b}P1$r0m\u{1b}\\tail",
            "\t\ttabs\tinside\t",
        ];
        for input in corpus {
            let once = sanitize_str(input);
            assert_eq!(sanitize_str(&once), once, "not idempotent for {:?}", input);
        }
    }

    #[test]
    fn test_arbitrary_bytes_never_panic() {
        let mut seed: u32 = 0x1234_5678;
        let mut bytes = Vec::with_capacity(4096);
        for _ in 0..4096 {
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            bytes.push((seed >> 16) as u8);
        }
        let once = sanitize(&bytes);
        assert!(once.bytes().all(|b| matches!(b, 0x20..=0x7e | b'\n' | b'\t')));
        assert_eq!(sanitize_str(&once), once);
    }
}
