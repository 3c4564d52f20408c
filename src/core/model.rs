use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// 滚动模式：当前实现只支持 Cron
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloverMode {
    #[default]
    Cron,
    TimeBased,
}

impl RolloverMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RolloverMode::Cron => "cron",
            RolloverMode::TimeBased => "time_based",
        }
    }
}

/// 模型的搜索引擎选项
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElasticsearchOptions {
    #[serde(default)]
    pub rollover_mode: RolloverMode,
    /// 5 段（分 时 日 月 周）或 6/7 段（带秒）cron 表达式
    #[serde(default = "default_cron")]
    pub cron: String,
    /// patch 别名窗口大小；0 表示不建 patch 别名
    #[serde(default)]
    pub patch_window: usize,
    #[serde(default)]
    pub purge_enabled: bool,
    /// search 别名下最多保留的技术索引数
    #[serde(default = "default_purge_max")]
    pub purge_max_indices: usize,
}

fn default_cron() -> String {
    "0 0 * * *".to_string()
}

fn default_purge_max() -> usize {
    30
}

impl Default for ElasticsearchOptions {
    fn default() -> Self {
        Self {
            rollover_mode: RolloverMode::Cron,
            cron: default_cron(),
            patch_window: 0,
            purge_enabled: false,
            purge_max_indices: default_purge_max(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Keyword,
    Text,
    Long,
    Double,
    Boolean,
    Date,
    Ip,
    GeoPoint,
}

impl FieldKind {
    fn es_type(&self) -> &'static str {
        match self {
            FieldKind::Keyword => "keyword",
            FieldKind::Text => "text",
            FieldKind::Long => "long",
            FieldKind::Double => "double",
            FieldKind::Boolean => "boolean",
            FieldKind::Date => "date",
            FieldKind::Ip => "ip",
            FieldKind::GeoPoint => "geo_point",
        }
    }
}

/// 字段定义；`name` 中的 `.` 表示嵌套对象
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub name: String,
    pub kind: FieldKind,
}

/// 数据模型（只读输入，启动时从配置加载）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Model {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldDefinition>,
    #[serde(default)]
    pub elasticsearch: ElasticsearchOptions,
}

impl Model {
    pub fn new(name: impl Into<String>, elasticsearch: ElasticsearchOptions) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            elasticsearch,
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(FieldDefinition {
            name: name.into(),
            kind,
        });
        self
    }

    /// 由字段定义推导 mappings（附带固定的 `@timestamp`）
    pub fn mapping(&self) -> Value {
        let mut props = Map::new();
        props.insert("@timestamp".to_string(), json!({ "type": "date" }));

        for field in &self.fields {
            let parts: Vec<&str> = field.name.split('.').filter(|p| !p.is_empty()).collect();
            insert_path(&mut props, &parts, field.kind.es_type());
        }

        json!({ "properties": Value::Object(props) })
    }
}

fn insert_path(props: &mut Map<String, Value>, parts: &[&str], es_type: &str) {
    match parts {
        [] => {}
        [leaf] => {
            props.insert(leaf.to_string(), json!({ "type": es_type }));
        }
        [head, rest @ ..] => {
            let node = props
                .entry(head.to_string())
                .or_insert_with(|| json!({ "properties": {} }));
            // 叶子被后续的子字段覆盖：降级为对象
            if !matches!(node.get("properties"), Some(Value::Object(_))) {
                *node = json!({ "properties": {} });
            }
            if let Some(Value::Object(children)) = node.get_mut("properties") {
                insert_path(children, rest, es_type);
            }
        }
    }
}
