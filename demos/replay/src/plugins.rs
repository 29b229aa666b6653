//! Demo plugins fed by the replay.

use atgm::core::Fields;
use atgm::prelude::*;

// ─── console ─────────────────────────────────────────────────────────────────

/// Logs the selected fields of every delivered record.
pub struct Console {
    selection: FieldSelection,
}

impl Console {
    fn from_config(config: &PluginConfig) -> Result<Self, BoxError> {
        let selection = match config.option::<Vec<String>>("fields")? {
            Some(names) => FieldSelection::new(names),
            None => FieldSelection::default(),
        };
        Ok(Self { selection })
    }
}

#[async_trait]
impl Plugin for Console {
    async fn handle(&mut self, record: Arc<Record>) -> Result<(), BoxError> {
        let fields = record.fields(&self.selection)?;
        info!(seq = record.seq(), fields = %render(&fields), "record");
        Ok(())
    }
}

fn render(fields: &Fields) -> String {
    fields
        .iter()
        .map(|(name, value)| match value {
            FieldValue::Int(v) => format!("{name}={v}"),
            FieldValue::Float(v) => format!("{name}={v:.4}"),
            FieldValue::Text(s) => format!("{name}={s}"),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

pub static CONSOLE: PluginDescriptor = define_plugin! {
    /// Logs selected marine fields of each record.
    name: "console",
    requires: [SerialStream],
    options: ["fields"],
    create: Console::from_config,
};

// ─── gravity-stats ───────────────────────────────────────────────────────────

/// Running gravity statistics, summarised when stopped.
#[derive(Default)]
pub struct GravityStats {
    count: u64,
    skipped: u64,
    sum: f64,
    min: Option<f64>,
    max: Option<f64>,
}

impl GravityStats {
    fn from_config(_config: &PluginConfig) -> Result<Self, BoxError> {
        Ok(Self::default())
    }
}

#[async_trait]
impl Plugin for GravityStats {
    async fn handle(&mut self, record: Arc<Record>) -> Result<(), BoxError> {
        let gravity = record
            .fields(&FieldSelection::new(["gravity"]))
            .ok()
            .and_then(|f| f.get("gravity").and_then(FieldValue::as_f64));

        let Some(g) = gravity else {
            self.skipped += 1;
            debug!(seq = record.seq(), "no gravity value");
            return Ok(());
        };

        self.count += 1;
        self.sum += g;
        self.min = Some(self.min.map_or(g, |m| m.min(g)));
        self.max = Some(self.max.map_or(g, |m| m.max(g)));
        Ok(())
    }

    async fn stop(&mut self) {
        if self.count == 0 {
            info!(skipped = self.skipped, "no gravity samples");
            return;
        }
        info!(
            samples = self.count,
            skipped = self.skipped,
            mean = self.sum / self.count as f64,
            min = self.min.unwrap_or_default(),
            max = self.max.unwrap_or_default(),
            "gravity summary"
        );
    }
}

pub static GRAVITY_STATS: PluginDescriptor = define_plugin! {
    name: "gravity-stats",
    create: GravityStats::from_config,
    metadata: {
        desc: "Mean and range of the gravity field.",
    },
};

#[cfg(test)]
mod tests {
    use super::*;

    const LINE: &str = "$UW,81242,-1948,557,4807924,307,874,204,6978,7541,-70,211,4970,0,39.9092,-105.0747,0.004,330.94,20160307151524";

    #[tokio::test]
    async fn stats_skip_unparseable_lines() {
        let mut stats = GravityStats::default();
        stats.handle(Arc::new(Record::now(0, LINE))).await.unwrap();
        stats.handle(Arc::new(Record::now(1, "garbage"))).await.unwrap();
        stats.handle(Arc::new(Record::now(2, ""))).await.unwrap();

        assert_eq!(stats.count, 1);
        assert_eq!(stats.skipped, 2);
        assert_eq!(stats.max, Some(81242.0));
    }

    #[test]
    fn console_reads_field_option() {
        let config = PluginConfig::from_value(
            "console",
            &serde_json::json!({ "fields": ["gravity", "latitude"] }),
        )
        .unwrap();
        let console = Console::from_config(&config).unwrap();
        let record = Record::now(0, LINE);
        let fields = record.fields(&console.selection).unwrap();
        assert_eq!(
            render(&fields),
            "gravity=81242.0000 latitude=39.9092"
        );
    }
}
