//! Bot 配置模块 - 解析 bot.cfg 并合并内置默认值
//!
//! 配置文件格式为 `key = value`，可以有 `[section]` 标题（仅作说明，不影响键名），
//! `#` 或 `//` 开头的行为注释。

use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, LazyLock};

use crate::events::{EventSink, LaunchEvent};

/// 默认配置文件名
pub const PROFILE_FILE_NAME: &str = "bot.cfg";

static SECTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[(.+)\]$").expect("Invalid section regex"));
static ENTRY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([^=]*)=(.*)$").expect("Invalid entry regex"));

/// 配置值（按字面量自动转换类型）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl ConfigValue {
    /// `true`/`false`（不区分大小写）→ Bool，纯数字 → Int，其他保持字符串
    pub fn coerce(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("true") {
            return ConfigValue::Bool(true);
        }
        if raw.eq_ignore_ascii_case("false") {
            return ConfigValue::Bool(false);
        }
        if !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(n) = raw.parse() {
                return ConfigValue::Int(n);
            }
        }
        ConfigValue::Str(raw.to_string())
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ConfigValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::Bool(b) => write!(f, "{}", b),
            ConfigValue::Int(n) => write!(f, "{}", n),
            ConfigValue::Str(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for ConfigValue {
    fn from(value: &str) -> Self {
        ConfigValue::Str(value.to_string())
    }
}

impl From<i64> for ConfigValue {
    fn from(value: i64) -> Self {
        ConfigValue::Int(value)
    }
}

impl From<bool> for ConfigValue {
    fn from(value: bool) -> Self {
        ConfigValue::Bool(value)
    }
}

/// 队伍
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Team {
    #[default]
    Blue,
    Orange,
}

impl Team {
    pub fn index(self) -> u8 {
        match self {
            Team::Blue => 0,
            Team::Orange => 1,
        }
    }

    pub fn from_index(index: i64) -> Option<Self> {
        match index {
            0 => Some(Team::Blue),
            1 => Some(Team::Orange),
            _ => None,
        }
    }
}

impl fmt::Display for Team {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Team::Blue => write!(f, "0 (Blue)"),
            Team::Orange => write!(f, "1 (Orange)"),
        }
    }
}

impl Serialize for Team {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.index())
    }
}

/// Bot 配置
#[derive(Debug, Clone, PartialEq)]
pub struct BotProfile {
    pub name: String,
    pub team: Team,
    pub tick_rate_preference: u32,
    /// 以下路径可以是相对 `working_dir` 的路径
    pub script_path: PathBuf,
    pub config_path: PathBuf,
    pub logo_path: PathBuf,
    pub requirements_path: PathBuf,
    /// bot 目录，描述文件也写在这里
    pub working_dir: PathBuf,
    /// 未识别的键，原样保留
    pub extra: BTreeMap<String, ConfigValue>,
}

impl BotProfile {
    /// 内置默认值
    pub fn defaults(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            name: "Nexto".to_string(),
            team: Team::Blue,
            tick_rate_preference: 120,
            script_path: PathBuf::from("./bot.py"),
            config_path: PathBuf::from(PROFILE_FILE_NAME),
            logo_path: PathBuf::from("./nexto_logo.png"),
            requirements_path: PathBuf::from("./requirements.txt"),
            working_dir: working_dir.into(),
            extra: BTreeMap::new(),
        }
    }

    /// 解析为绝对路径（不访问文件系统）
    pub fn resolve(&self, path: &Path) -> PathBuf {
        let joined = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.working_dir.join(path)
        };
        let cleaned: PathBuf = joined
            .components()
            .filter(|c| !matches!(c, Component::CurDir))
            .collect();
        std::path::absolute(&cleaned).unwrap_or(cleaned)
    }

    pub fn script_file(&self) -> PathBuf {
        self.resolve(&self.script_path)
    }

    pub fn config_file(&self) -> PathBuf {
        self.resolve(&self.config_path)
    }

    pub fn logo_file(&self) -> PathBuf {
        self.resolve(&self.logo_path)
    }

    pub fn requirements_file(&self) -> PathBuf {
        self.resolve(&self.requirements_path)
    }

    /// 查询未识别的键
    pub fn value(&self, key: &str) -> Option<&ConfigValue> {
        self.extra.get(key)
    }

    pub fn str_value(&self, key: &str) -> Option<&str> {
        self.value(key).and_then(ConfigValue::as_str)
    }

    pub fn int_value(&self, key: &str) -> Option<i64> {
        self.value(key).and_then(ConfigValue::as_int)
    }

    pub fn bool_value(&self, key: &str) -> Option<bool> {
        self.value(key).and_then(ConfigValue::as_bool)
    }
}

/// 单行解析结果
enum Line<'a> {
    Blank,
    Comment,
    Section(&'a str),
    Entry { key: &'a str, value: &'a str },
    Malformed(&'static str),
}

fn classify(line: &str) -> Line<'_> {
    let line = line.trim();
    if line.is_empty() {
        return Line::Blank;
    }
    if line.starts_with('#') || line.starts_with("//") {
        return Line::Comment;
    }
    if let Some(caps) = SECTION_RE.captures(line) {
        return Line::Section(caps.get(1).map_or("", |m| m.as_str()));
    }
    match ENTRY_RE.captures(line) {
        Some(caps) => {
            let key = caps.get(1).map_or("", |m| m.as_str()).trim();
            let value = caps.get(2).map_or("", |m| m.as_str()).trim();
            if key.is_empty() {
                Line::Malformed("empty key")
            } else {
                Line::Entry { key, value }
            }
        }
        None => Line::Malformed("expected `key = value`"),
    }
}

/// 配置存储
pub struct ConfigStore {
    events: Arc<dyn EventSink>,
}

impl ConfigStore {
    pub fn new(events: Arc<dyn EventSink>) -> Self {
        Self { events }
    }

    /// 加载配置；文件不存在时返回默认值，坏行跳过并告警
    pub fn load(&self, path: &Path) -> BotProfile {
        let working_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let mut profile = BotProfile::defaults(working_dir);
        if let Some(file_name) = path.file_name() {
            profile.config_path = PathBuf::from(file_name);
        }

        if !path.exists() {
            return profile;
        }

        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                self.warn(path, 0, format!("unreadable profile, using defaults: {}", e));
                return profile;
            }
        };

        for (index, line) in content.lines().enumerate() {
            match classify(line) {
                Line::Blank | Line::Comment | Line::Section(_) => {}
                Line::Malformed(reason) => self.warn(path, index + 1, reason.to_string()),
                Line::Entry { key, value } => {
                    self.apply(&mut profile, path, index + 1, key, ConfigValue::coerce(value))
                }
            }
        }

        self.events.emit(LaunchEvent::ProfileLoaded {
            path: path.to_path_buf(),
            name: profile.name.clone(),
        });
        profile
    }

    fn apply(&self, profile: &mut BotProfile, path: &Path, line: usize, key: &str, value: ConfigValue) {
        match key {
            "name" => profile.name = value.to_string(),
            "team" => match value.as_int().and_then(Team::from_index) {
                Some(team) => profile.team = team,
                None => self.warn(path, line, format!("invalid team `{}`, expected 0 or 1", value)),
            },
            "maximum_tick_rate_preference" => {
                match value.as_int().and_then(|n| u32::try_from(n).ok()) {
                    Some(rate) => profile.tick_rate_preference = rate,
                    None => self.warn(path, line, format!("invalid tick rate `{}`", value)),
                }
            }
            "python_file" => profile.script_path = PathBuf::from(value.to_string()),
            "requirements_file" => profile.requirements_path = PathBuf::from(value.to_string()),
            "logo_file" => profile.logo_path = PathBuf::from(value.to_string()),
            _ => {
                profile.extra.insert(key.to_string(), value);
            }
        }
    }

    /// 原地改写已有键的值，保留注释、顺序和其他行
    ///
    /// 文件里没有的键不会被添加。文件不存在或写入失败时返回 false。
    pub fn update(&self, path: &Path, changes: &BTreeMap<String, ConfigValue>) -> bool {
        self.write_changes(path, changes, None)
    }

    /// 同 [`update`](Self::update)，但文件里没有的键会追加到 `[section]` 末尾
    ///
    /// 该段不存在时在文件末尾新建。
    pub fn upsert(&self, path: &Path, section: &str, changes: &BTreeMap<String, ConfigValue>) -> bool {
        self.write_changes(path, changes, Some(section))
    }

    fn write_changes(&self, path: &Path, changes: &BTreeMap<String, ConfigValue>, section: Option<&str>) -> bool {
        if !path.exists() {
            self.events.emit(LaunchEvent::ProfileUpdateFailed {
                path: path.to_path_buf(),
                reason: "config file not found".to_string(),
            });
            return false;
        }

        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                self.events.emit(LaunchEvent::ProfileUpdateFailed {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                });
                return false;
            }
        };

        let mut updated = String::with_capacity(content.len());
        let mut touched = Vec::new();
        for segment in content.split_inclusive('\n') {
            let (body, ending) = split_line_ending(segment);
            match classify(body) {
                Line::Entry { key, .. } if changes.contains_key(key) => {
                    let indent = &body[..body.len() - body.trim_start().len()];
                    updated.push_str(indent);
                    updated.push_str(key);
                    updated.push_str(" = ");
                    updated.push_str(&changes[key].to_string());
                    updated.push_str(ending);
                    if !touched.iter().any(|k| k == key) {
                        touched.push(key.to_string());
                    }
                }
                _ => updated.push_str(segment),
            }
        }

        if let Some(section) = section {
            let missing: Vec<(&String, &ConfigValue)> =
                changes.iter().filter(|(key, _)| !touched.contains(*key)).collect();
            if !missing.is_empty() {
                updated = insert_entries(&updated, section, &missing);
                touched.extend(missing.into_iter().map(|(key, _)| key.clone()));
            }
        }

        if let Err(e) = fs::write(path, updated) {
            self.events.emit(LaunchEvent::ProfileUpdateFailed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            });
            return false;
        }

        self.events.emit(LaunchEvent::ProfileUpdated {
            path: path.to_path_buf(),
            keys: touched,
        });
        true
    }

    fn warn(&self, path: &Path, line: usize, message: String) {
        self.events.emit(LaunchEvent::ProfileWarning {
            path: path.to_path_buf(),
            line,
            message,
        });
    }
}

fn split_line_ending(segment: &str) -> (&str, &str) {
    if let Some(body) = segment.strip_suffix("\r\n") {
        (body, "\r\n")
    } else if let Some(body) = segment.strip_suffix('\n') {
        (body, "\n")
    } else {
        (segment, "")
    }
}

/// 把新条目插到 `[section]` 最后一个非空行之后，沿用文件原有的换行符
fn insert_entries(content: &str, section: &str, entries: &[(&String, &ConfigValue)]) -> String {
    let newline = if content.contains("\r\n") { "\r\n" } else { "\n" };
    let block: String = entries
        .iter()
        .map(|(key, value)| format!("{} = {}{}", key, value, newline))
        .collect();

    let segments: Vec<&str> = content.split_inclusive('\n').collect();
    let mut in_section = false;
    let mut anchor = None;
    for (index, segment) in segments.iter().enumerate() {
        match classify(split_line_ending(segment).0) {
            Line::Section(name) => {
                in_section = name.trim() == section;
                if in_section {
                    anchor = Some(index);
                }
            }
            Line::Blank => {}
            _ if in_section => anchor = Some(index),
            _ => {}
        }
    }

    let mut out = String::with_capacity(content.len() + block.len() + section.len() + 4);
    match anchor {
        Some(anchor) => {
            for (index, segment) in segments.iter().enumerate() {
                out.push_str(segment);
                if index == anchor {
                    if !segment.ends_with('\n') {
                        out.push_str(newline);
                    }
                    out.push_str(&block);
                }
            }
        }
        None => {
            out.push_str(content);
            if !content.is_empty() {
                if !content.ends_with('\n') {
                    out.push_str(newline);
                }
                out.push_str(newline);
            }
            out.push('[');
            out.push_str(section);
            out.push(']');
            out.push_str(newline);
            out.push_str(&block);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemorySink;
    use tempfile::tempdir;

    fn store() -> (ConfigStore, Arc<MemorySink>) {
        let sink = MemorySink::new();
        (ConfigStore::new(sink.clone()), sink)
    }

    #[test]
    fn test_coerce_values() {
        assert_eq!(ConfigValue::coerce("TRUE"), ConfigValue::Bool(true));
        assert_eq!(ConfigValue::coerce("False"), ConfigValue::Bool(false));
        assert_eq!(ConfigValue::coerce("120"), ConfigValue::Int(120));
        assert_eq!(ConfigValue::coerce("-1"), ConfigValue::Str("-1".to_string()));
        assert_eq!(ConfigValue::coerce("1.5"), ConfigValue::Str("1.5".to_string()));
        assert_eq!(ConfigValue::coerce(""), ConfigValue::Str(String::new()));
    }

    #[test]
    fn test_missing_file_returns_defaults() {
        let temp = tempdir().unwrap();
        let (store, sink) = store();

        let profile = store.load(&temp.path().join("bot.cfg"));

        assert_eq!(profile.name, "Nexto");
        assert_eq!(profile.team, Team::Blue);
        assert_eq!(profile.tick_rate_preference, 120);
        assert!(profile.script_file().ends_with("bot.py"));
        assert!(sink.events().is_empty());
    }

    #[test]
    fn test_load_sections_comments_and_unknown_keys() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("bot.cfg");
        fs::write(
            &path,
            "[Locations]\n# comment = ignored\n// also = ignored\nname = Nexto v2\npython_file = ./src/bot.py\n\n[Details]\nteam = 1\nmaximum_tick_rate_preference = 60\nfun_fact = Nexto is fast\nsupports_early_start = True\n",
        )
        .unwrap();
        let (store, sink) = store();

        let profile = store.load(&path);

        assert_eq!(profile.name, "Nexto v2");
        assert_eq!(profile.team, Team::Orange);
        assert_eq!(profile.tick_rate_preference, 60);
        assert!(profile.script_file().ends_with("src/bot.py"));
        assert_eq!(profile.str_value("fun_fact"), Some("Nexto is fast"));
        assert_eq!(profile.bool_value("supports_early_start"), Some(true));
        assert!(profile.value("comment").is_none());
        assert!(!sink.events().iter().any(|e| matches!(e, LaunchEvent::ProfileWarning { .. })));
    }

    #[test]
    fn test_malformed_lines_are_skipped_with_warning() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("bot.cfg");
        fs::write(&path, "name = Nexto\nthis line is broken\n= no key\nteam = 7\n").unwrap();
        let (store, sink) = store();

        let profile = store.load(&path);

        assert_eq!(profile.name, "Nexto");
        assert_eq!(profile.team, Team::Blue);
        let warnings: Vec<usize> = sink
            .events()
            .iter()
            .filter_map(|e| match e {
                LaunchEvent::ProfileWarning { line, .. } => Some(*line),
                _ => None,
            })
            .collect();
        assert_eq!(warnings, vec![2, 3, 4]);
    }

    #[test]
    fn test_update_preserves_other_lines() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("bot.cfg");
        let original = "[Details]\r\n# team picks side\r\n  team = 0\r\nname = Nexto\r\nfun_fact=keep   spacing\r\n";
        fs::write(&path, original).unwrap();
        let (store, _sink) = store();

        let mut changes = BTreeMap::new();
        changes.insert("team".to_string(), ConfigValue::Int(1));
        assert!(store.update(&path, &changes));

        let updated = fs::read_to_string(&path).unwrap();
        assert_eq!(
            updated,
            "[Details]\r\n# team picks side\r\n  team = 1\r\nname = Nexto\r\nfun_fact=keep   spacing\r\n"
        );
        assert_eq!(store.load(&path).team, Team::Orange);
    }

    #[test]
    fn test_update_missing_file_returns_false() {
        let temp = tempdir().unwrap();
        let (store, sink) = store();

        let mut changes = BTreeMap::new();
        changes.insert("team".to_string(), ConfigValue::Int(1));

        assert!(!store.update(&temp.path().join("nope.cfg"), &changes));
        assert!(!temp.path().join("nope.cfg").exists());
        assert_eq!(
            sink.count(|e| matches!(e, LaunchEvent::ProfileUpdateFailed { .. })),
            1
        );
    }

    #[test]
    fn test_update_does_not_add_missing_key() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("bot.cfg");
        fs::write(&path, "name = Nexto\n").unwrap();
        let (store, sink) = store();

        let changes = BTreeMap::from([("team".to_string(), ConfigValue::Int(1))]);
        assert!(store.update(&path, &changes));

        assert_eq!(fs::read_to_string(&path).unwrap(), "name = Nexto\n");
        assert!(sink.events().contains(&LaunchEvent::ProfileUpdated {
            path: path.clone(),
            keys: Vec::new(),
        }));
    }

    #[test]
    fn test_insert_entries_after_last_line_of_section() {
        let team = "team".to_string();
        let one = ConfigValue::Int(1);
        let content = "[Locations]\r\nname = Nexto\r\n\r\n[Details]\r\ndeveloper = Rolv\r\n\r\n[Bot Parameters]\r\n";

        let out = insert_entries(content, "Details", &[(&team, &one)]);

        assert_eq!(
            out,
            "[Locations]\r\nname = Nexto\r\n\r\n[Details]\r\ndeveloper = Rolv\r\nteam = 1\r\n\r\n[Bot Parameters]\r\n"
        );
    }

    #[test]
    fn test_insert_entries_creates_section() {
        let team = "team".to_string();
        let one = ConfigValue::Int(1);

        let out = insert_entries("name = Nexto", "Details", &[(&team, &one)]);

        assert_eq!(out, "name = Nexto\n\n[Details]\nteam = 1\n");
    }
}
