use chrono::{DateTime, Datelike, Utc};

/// `-YYYY-MM-NNNN` 后缀长度
const SUFFIX_LEN: usize = 1 + 4 + 1 + 2 + 1 + 4;

/// 四位序号的上限：每个逻辑索引每月最多 9999 个技术索引
pub const MAX_SEQUENCE: u32 = 9999;

/// 逻辑索引通配（覆盖全部技术索引）
pub fn wildcard(logical: &str) -> String {
    format!("{}-*", logical)
}

/// 某年月的技术索引前缀：`{logical}-YYYY-MM-`
pub fn month_prefix(logical: &str, year: i32, month: u32) -> String {
    format!("{}-{:04}-{:02}-", logical, year, month)
}

pub fn technical_name(logical: &str, year: i32, month: u32, seq: u32) -> String {
    format!("{}{:04}", month_prefix(logical, year, month), seq)
}

/// 解析技术索引名：结构不符（长度/分隔符/非数字）一律返回 None
///
/// 旧格式或外来名称不是错误，调用方直接忽略即可。
pub fn parse_technical_name(logical: &str, name: &str) -> Option<(i32, u32, u32)> {
    if name.len() != logical.len() + SUFFIX_LEN {
        return None;
    }
    let rest = name.strip_prefix(logical)?.as_bytes();
    // rest = "-YYYY-MM-NNNN"
    if rest[0] != b'-' || rest[5] != b'-' || rest[8] != b'-' {
        return None;
    }
    let digits = |r: std::ops::Range<usize>| -> Option<u32> {
        let b = &rest[r];
        if !b.iter().all(u8::is_ascii_digit) {
            return None;
        }
        std::str::from_utf8(b).ok()?.parse().ok()
    };
    let year = digits(1..5)? as i32;
    let month = digits(6..8)?;
    let seq = digits(9..13)?;
    if !(1..=12).contains(&month) {
        return None;
    }
    Some((year, month, seq))
}

/// 计算下一个技术索引名
///
/// 只看参考时间所在年月的 `{logical}-YYYY-MM-NNNN`；取最大序号 +1（无匹配则为 0001）。
/// 当月序号已用到 `MAX_SEQUENCE` 时返回 None。
/// 纯函数：相同输入恒得相同输出。
pub fn next_technical_name<S: AsRef<str>>(
    logical: &str,
    existing: &[S],
    at: DateTime<Utc>,
) -> Option<String> {
    let (year, month) = (at.year(), at.month());
    let max_seq = existing
        .iter()
        .filter_map(|n| parse_technical_name(logical, n.as_ref()))
        .filter(|(y, m, _)| *y == year && *m == month)
        .map(|(_, _, seq)| seq)
        .max()
        .unwrap_or(0);
    if max_seq >= MAX_SEQUENCE {
        return None;
    }
    Some(technical_name(logical, year, month, max_seq + 1))
}
