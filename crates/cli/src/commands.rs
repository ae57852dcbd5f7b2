use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use tracing::{info, warn};

use sopmatrix_core::{
    build_learning_items, normalize_workbook, role_documents, unique_file_names, write_facts_csv,
    ApplicabilityLevel, Dimension, FilterEngine, FilterSpec, LearningItem, LearningItemKind,
    SopRoleFact, TextChunker, Workbook,
};
use sopmatrix_rag::{
    build_partition_indices, EmbeddingClient, LlmClient, LlmProvider, RetrievalAnswerer,
};

use crate::cli::{Command, FilterArgs, WorkbookArgs};
use crate::config::{AppConfig, RetrievalSection};

pub fn run<W: Write>(command: Command, config: &AppConfig, out: &mut W) -> Result<()> {
    match command {
        Command::Roles { input } => roles(&input, config, out),
        Command::Facts { input, json } => facts(&input, config, json, out),
        Command::Filter { input, filter, out: path } => {
            let spec = filter_spec(&filter)?;
            let facts = load_facts(&input, config)?;
            let view = FilterEngine::evaluate(&facts, &spec);
            info!(total = facts.len(), kept = view.len(), "filtered facts");
            match path {
                Some(path) => {
                    let file = fs::File::create(&path)
                        .with_context(|| format!("failed to create {}", path.display()))?;
                    write_facts_csv(file, &view)?;
                    info!(path = %path.display(), "wrote filtered view");
                }
                None => write_facts_csv(&mut *out, &view)?,
            }
            Ok(())
        }
        Command::Contexts { input, out_dir } => {
            let facts = load_facts(&input, config)?;
            let written = write_role_contexts(&facts, &out_dir)?;
            writeln!(out, "wrote {written} role context files to {}", out_dir.display())?;
            Ok(())
        }
        Command::Audience {
            input,
            roles,
            groups,
            practices,
            json,
        } => {
            let workbook = open_workbook(&input)?;
            let sheet = workbook
                .sheets
                .first()
                .ok_or_else(|| anyhow!("{} has no sheets", input.workbook.display()))?;
            let items = build_learning_items(&sheet.grid)?;
            let spec = FilterSpec::new()
                .with(Dimension::Role, roles)
                .with(Dimension::Group, groups)
                .with(Dimension::Practice, practices);
            let view = FilterEngine::evaluate(&items, &spec);
            if json {
                serde_json::to_writer_pretty(&mut *out, &view)?;
                writeln!(out)?;
            } else {
                write_learning_items(&view, out)?;
            }
            Ok(())
        }
        Command::Chunk {
            input,
            size,
            overlap,
        } => {
            let text = fs::read_to_string(&input)
                .with_context(|| format!("failed to read {}", input.display()))?;
            let chunker = TextChunker::new(config.chunk_config(size, overlap))?;
            for chunk in chunker.split(&source_id(&input), &text) {
                serde_json::to_writer(&mut *out, &chunk)?;
                writeln!(out)?;
            }
            Ok(())
        }
        Command::Ask {
            question,
            corpus,
            workbook,
            top_k,
            provider,
            model,
            show_context,
        } => {
            let mut partitions = Vec::new();
            for path in &corpus {
                let text = fs::read_to_string(path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                partitions.push((source_id(path), text));
            }
            if let Some(path) = workbook {
                let input = WorkbookArgs {
                    workbook: path,
                    sheet: None,
                };
                for doc in role_documents(&load_facts(&input, config)?) {
                    partitions.push((doc.role_name, doc.text));
                }
            }
            if partitions.is_empty() {
                bail!("nothing to search: pass --corpus and/or --workbook");
            }
            let chunker = TextChunker::new(config.chunk_config(None, None))?;
            let embeddings = EmbeddingClient::from_env()?;
            let indices = build_partition_indices(&partitions, &chunker, &embeddings)?;
            let completion = completion_client(&config.retrieval, provider, model)?;
            let answerer = RetrievalAnswerer::new(embeddings, completion)
                .with_top_k(top_k.unwrap_or(config.retrieval.top_k))?;
            let answer = answerer.answer_merged(&question, &indices)?;
            if show_context {
                for hit in &answer.used_chunks {
                    writeln!(
                        out,
                        "[{} #{} score {:.3}] {}",
                        hit.chunk.source_id, hit.chunk.index, hit.score, hit.chunk.text
                    )?;
                }
                writeln!(out)?;
            }
            writeln!(out, "{}", answer.answer)?;
            Ok(())
        }
    }
}

fn open_workbook(input: &WorkbookArgs) -> Result<Workbook> {
    let workbook = Workbook::open(&input.workbook)
        .with_context(|| format!("failed to read workbook {}", input.workbook.display()))?;
    Ok(workbook.only(input.sheet.as_deref())?)
}

fn load_facts(input: &WorkbookArgs, config: &AppConfig) -> Result<Vec<SopRoleFact>> {
    let workbook = open_workbook(input)?;
    let result = normalize_workbook(&workbook, &config.parser()?, &config.fact_builder())?;
    for (sheet, err) in &result.skipped {
        warn!(sheet = %sheet, error = %err, "sheet skipped");
    }
    if !workbook.sheets.is_empty() && result.skipped.len() == workbook.sheets.len() {
        bail!("no sheet of {} matched the matrix layout", input.workbook.display());
    }
    Ok(result.facts)
}

fn roles<W: Write>(input: &WorkbookArgs, config: &AppConfig, out: &mut W) -> Result<()> {
    let workbook = open_workbook(input)?;
    let parser = config.parser()?;
    let mut csv = csv::Writer::from_writer(out);
    csv.write_record(["Sheet", "Column", "Group", "Role"])?;
    for sheet in &workbook.sheets {
        let parsed = match parser.parse(&sheet.grid) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(sheet = %sheet.name, error = %err, "sheet skipped");
                continue;
            }
        };
        for role in &parsed.role_columns {
            let column = role.column_index.to_string();
            csv.write_record([
                sheet.name.as_str(),
                column.as_str(),
                role.group_name.as_str(),
                role.role_name.as_str(),
            ])?;
        }
    }
    csv.flush()?;
    Ok(())
}

fn facts<W: Write>(
    input: &WorkbookArgs,
    config: &AppConfig,
    json: bool,
    out: &mut W,
) -> Result<()> {
    let facts = load_facts(input, config)?;
    if json {
        serde_json::to_writer_pretty(&mut *out, &facts)?;
        writeln!(out)?;
        return Ok(());
    }
    let mut csv = csv::Writer::from_writer(out);
    csv.write_record([
        "Sheet",
        "Number",
        "Title",
        "Business Unit",
        "SOP Type",
        "Practice",
        "Role",
        "Group",
        "Level",
        "Category",
        "Notes",
        "Region tags",
    ])?;
    for fact in &facts {
        let level = fact.applicability_level.code().to_string();
        let regions = fact.region_tags.join(", ");
        csv.write_record([
            fact.sheet.as_str(),
            fact.sop_id.as_str(),
            fact.sop_title.as_str(),
            fact.business_unit.as_str(),
            fact.sop_type.as_str(),
            fact.practice.as_str(),
            fact.role_name.as_str(),
            fact.group_name.as_str(),
            level.as_str(),
            fact.applicability_level.label(),
            fact.notes.as_str(),
            regions.as_str(),
        ])?;
    }
    csv.flush()?;
    Ok(())
}

fn write_learning_items<W: Write>(items: &[LearningItem], out: &mut W) -> Result<()> {
    let mut csv = csv::Writer::from_writer(out);
    csv.write_record(["Title", "ID", "Type", "Roles", "Groups", "Practices"])?;
    for item in items {
        let kind = match item.kind {
            LearningItemKind::Curriculum => "curriculum",
            LearningItemKind::Course => "course",
        };
        csv.write_record([
            item.title.as_str(),
            item.id.as_str(),
            kind,
            item.roles.join(", ").as_str(),
            item.groups.join(", ").as_str(),
            item.practices.join(", ").as_str(),
        ])?;
    }
    csv.flush()?;
    Ok(())
}

/// Category values are validated here so a typo fails loudly instead of
/// filtering everything out.
fn filter_spec(args: &FilterArgs) -> Result<FilterSpec> {
    for value in &args.categories {
        if ApplicabilityLevel::parse(value).is_none() {
            bail!("unknown category '{value}' (expected 1, 2, 3 or a category label)");
        }
    }
    Ok(FilterSpec::new()
        .with(Dimension::Role, args.roles.iter().cloned())
        .with(Dimension::Group, args.groups.iter().cloned())
        .with(Dimension::Category, args.categories.iter().map(|c| c.trim().to_string()))
        .with(Dimension::Practice, args.practices.iter().cloned())
        .with(Dimension::Region, args.regions.iter().map(|r| r.to_lowercase()))
        .with(Dimension::BusinessUnit, args.business_units.iter().cloned())
        .with(Dimension::SopType, args.sop_types.iter().cloned()))
}

fn write_role_contexts(facts: &[SopRoleFact], out_dir: &Path) -> Result<usize> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create {}", out_dir.display()))?;
    let docs = role_documents(facts);
    for (doc, name) in docs.iter().zip(unique_file_names(&docs)) {
        if name != doc.file_name() {
            warn!(
                role = %doc.role_name,
                file = %name,
                "role file name collides, writing with suffix"
            );
        }
        let path = out_dir.join(name);
        fs::write(&path, &doc.text)
            .with_context(|| format!("failed to write {}", path.display()))?;
    }
    Ok(docs.len())
}

fn completion_client(
    retrieval: &RetrievalSection,
    provider: Option<String>,
    model: Option<String>,
) -> Result<LlmClient> {
    let client = match provider.or_else(|| retrieval.provider.clone()) {
        Some(name) => {
            let provider = LlmProvider::from_str(&name)
                .ok_or_else(|| anyhow!("unknown provider '{name}'"))?;
            let model = model
                .or_else(|| retrieval.model.clone())
                .unwrap_or_else(|| provider.default_model().to_string());
            LlmClient::new(provider, model)?
        }
        None => LlmClient::from_env()?,
    };
    client.with_timeout(retrieval.timeout())
}

fn source_id(path: &Path) -> String {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .unwrap_or_else(|| path.display().to_string())
}
