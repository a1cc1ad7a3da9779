use crate::config::StepLengths;
use crate::error::{PipelineError, Result};
use crate::stage::{Stage, SubStep};
use handlebars::Handlebars;
use include_dir::{include_dir, Dir};
use serde_json::{json, Value};

static TEMPLATES: Dir<'_> = include_dir!("$CARGO_MANIFEST_DIR/templates");

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResidueRange {
    pub start: u32,
    pub end: u32,
}

impl ResidueRange {
    pub fn mask(&self) -> String {
        format!(":{}-{}", self.start, self.end)
    }
}

pub struct DescriptorRenderer<'a> {
    handlebars: Handlebars<'a>,
}

impl<'a> DescriptorRenderer<'a> {
    pub fn new() -> Result<Self> {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(true);
        handlebars.register_escape_fn(handlebars::no_escape);

        for stage in Stage::ALL {
            for step in stage.sub_steps() {
                let file_name = format!("{}.in.hbs", step.name);
                let source = TEMPLATES
                    .get_file(&file_name)
                    .and_then(|f| f.contents_utf8())
                    .ok_or_else(|| {
                        PipelineError::Template(format!("missing embedded template {}", file_name))
                    })?;
                handlebars
                    .register_template_string(step.name, source)
                    .map_err(|e| PipelineError::Template(format!("{}: {}", file_name, e)))?;
            }
        }
        Ok(Self { handlebars })
    }

    pub fn render(
        &self,
        step: &SubStep,
        residues: ResidueRange,
        lengths: &StepLengths,
    ) -> Result<String> {
        let data = descriptor_data(step, residues, lengths);
        self.handlebars
            .render(step.name, &data)
            .map_err(|e| PipelineError::Template(format!("{}: {}", step.name, e)))
    }
}

fn descriptor_data(step: &SubStep, residues: ResidueRange, lengths: &StepLengths) -> Value {
    let nstlim = lengths.for_stage(step.stage);
    json!({
        "residue_start": residues.start,
        "residue_end": residues.end,
        "restraint_mask": residues.mask(),
        "nstlim": nstlim,
        "maxcyc": lengths.min_cycles,
        "ncyc": lengths.min_cycles / 2,
        "ntpr": lengths.ntpr,
        "ntwx": lengths.ntwx,
        "ntwr": lengths.ntwr,
    })
}
