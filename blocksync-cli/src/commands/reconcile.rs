//! `blocksync reconcile`: apply a template to a block tree file.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use colored::Colorize;

use blocksync_core::{BlockId, SubtreeId, TemplateLock, TreeStore};
use blocksync_template::{
    load_blocks, load_template, BlockIdGenerator, LockSetting, NestedSettings, TemplateOutcome, TemplateSync,
    TemplateSynchronizer,
};

/// Template lock requested for the reconciled subtree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LockArg {
    /// Use the lock of the enclosing list.
    #[default]
    Inherit,
    #[value(name = "none")]
    Unlocked,
    Insert,
    All,
}

impl From<LockArg> for LockSetting {
    fn from(lock: LockArg) -> Self {
        match lock {
            LockArg::Inherit => LockSetting::Inherit,
            LockArg::Unlocked => LockSetting::Unlocked,
            LockArg::Insert => LockSetting::Locked(TemplateLock::Insert),
            LockArg::All => LockSetting::Locked(TemplateLock::All),
        }
    }
}

/// Arguments for `blocksync reconcile`.
#[derive(Args, Debug)]
pub struct ReconcileArgs {
    /// Block tree file (.yaml, .yml or .json).
    pub tree: PathBuf,

    /// Template file (.yaml, .yml or .json).
    #[arg(long)]
    pub template: PathBuf,

    /// Block whose children are reconciled; the document root when omitted.
    #[arg(long)]
    pub subtree: Option<String>,

    #[arg(long, value_enum, default_value_t = LockArg::Inherit)]
    pub lock: LockArg,

    /// Prefix for ids of inserted blocks.
    #[arg(long, default_value = "tpl")]
    pub id_prefix: String,

    /// Emit the document as JSON instead of YAML.
    #[arg(long)]
    pub json: bool,
}

impl ReconcileArgs {
    pub fn run(self) -> Result<()> {
        let tree = load_blocks(&self.tree)
            .with_context(|| format!("failed to load block tree '{}'", self.tree.display()))?;
        let template = load_template(&self.template)
            .with_context(|| format!("failed to load template '{}'", self.template.display()))?;

        let store = TreeStore::with_document(tree);
        let subtree = match &self.subtree {
            Some(id) => {
                let id = BlockId::from(id.as_str());
                if store.block(&id).is_none() {
                    anyhow::bail!("block '{id}' not found in '{}'", self.tree.display());
                }
                SubtreeId::Block(id)
            }
            None => SubtreeId::Root,
        };

        let lock = match &subtree {
            SubtreeId::Block(id) => {
                let settings = NestedSettings {
                    template_lock: self.lock.into(),
                    ..NestedSettings::default()
                };
                settings.apply(&store, id).template_lock
            }
            SubtreeId::Root => match LockSetting::from(self.lock) {
                LockSetting::Locked(lock) => Some(lock),
                LockSetting::Inherit | LockSetting::Unlocked => None,
            },
        };

        let mut sync = TemplateSync::new(
            subtree.clone(),
            TemplateSynchronizer::new(BlockIdGenerator::new(self.id_prefix)),
        );
        let outcome = sync
            .apply(&store, &template, lock)
            .with_context(|| format!("failed to apply template to '{subtree}'"))?;
        eprintln!("{} {subtree}: {}", outcome_indicator(outcome), outcome_label(outcome));

        let document = store.document();
        let rendered = if self.json {
            serde_json::to_string_pretty(&document).context("failed to serialize document")?
        } else {
            serde_yaml::to_string(&document).context("failed to serialize document")?
        };
        println!("{}", rendered.trim_end());
        Ok(())
    }
}

fn outcome_label(outcome: TemplateOutcome) -> &'static str {
    match outcome {
        TemplateOutcome::NotApplicable => "not applicable (subtree has content and is not locked)",
        TemplateOutcome::TemplateUnchanged => "template unchanged",
        TemplateOutcome::UpToDate => "already matches template",
        TemplateOutcome::Replaced => "replaced from template",
    }
}

fn outcome_indicator(outcome: TemplateOutcome) -> String {
    match outcome {
        TemplateOutcome::Replaced => "■".green().bold().to_string(),
        TemplateOutcome::UpToDate | TemplateOutcome::TemplateUnchanged => "■".bright_black().bold().to_string(),
        TemplateOutcome::NotApplicable => "■".yellow().bold().to_string(),
    }
}
