//! Project documentation: a prose overview and a Mermaid architecture
//! diagram generated from the leading chunks of a repository, plus one
//! entry per class and function chunk.

use anyhow::{Context, Result};
use futures_util::future::join_all;

use crate::llm::SharedGenerator;
use crate::models::{Chunk, ChunkKind, ComponentDoc};

/// How many chunks are shown to the model.
const DOC_CHUNK_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectDocs {
    pub overview: String,
    /// Mermaid flowchart source, without code fences.
    pub architecture: String,
    /// In chunk order. Components whose generation failed are missing.
    pub components: Vec<ComponentDoc>,
}

pub struct DocumentationGenerator {
    generator: SharedGenerator,
}

impl DocumentationGenerator {
    pub fn new(generator: SharedGenerator) -> Self {
        Self { generator }
    }

    pub async fn generate(&self, chunks: &[Chunk]) -> Result<ProjectDocs> {
        let context = format_chunks(chunks);

        let overview = self
            .generator
            .generate(&overview_prompt(&context))
            .await
            .context("Failed to generate project overview")?;
        let diagram = self
            .generator
            .generate(&architecture_prompt(&context))
            .await
            .context("Failed to generate architecture diagram")?;

        let components = self.document_components(chunks).await;

        Ok(ProjectDocs {
            overview: overview.trim().to_string(),
            architecture: strip_fences(&diagram),
            components,
        })
    }

    /// Document every class and function chunk. Methods are covered by
    /// their class. A failed component is logged and left out.
    pub async fn document_components(&self, chunks: &[Chunk]) -> Vec<ComponentDoc> {
        let components: Vec<&Chunk> = chunks
            .iter()
            .filter(|c| matches!(c.kind, ChunkKind::Class | ChunkKind::Function))
            .collect();

        let results = join_all(components.iter().map(|chunk| async move {
            let text = self.generator.generate(&component_prompt(chunk)).await;
            (*chunk, text)
        }))
        .await;

        let mut docs = Vec::with_capacity(results.len());
        for (chunk, text) in results {
            match text {
                Ok(text) => docs.push(ComponentDoc {
                    name: chunk.name.clone(),
                    kind: chunk.kind,
                    location: chunk.location.clone(),
                    documentation: text.trim().to_string(),
                }),
                Err(e) => tracing::warn!(
                    "Failed to document {} in {}: {e}",
                    chunk.name,
                    chunk.location
                ),
            }
        }
        tracing::debug!("Documented {} of {} components", docs.len(), components.len());
        docs
    }
}

fn format_chunks(chunks: &[Chunk]) -> String {
    chunks
        .iter()
        .take(DOC_CHUNK_LIMIT)
        .map(|c| {
            format!(
                "File: {}\nType: {}\nName: {}\n\nCode:\n{}\n",
                c.location,
                c.kind.as_str(),
                c.name,
                c.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn overview_prompt(context: &str) -> String {
    format!(
        "Analyze these code chunks and provide a comprehensive overview of the project:\n\n\
         {context}\n\
         Include:\n\
         1. Project purpose and main features\n\
         2. Technologies used\n\
         3. High-level architecture\n\
         4. Key components and their responsibilities"
    )
}

fn architecture_prompt(context: &str) -> String {
    format!(
        "Based on these code chunks, generate a Mermaid.js flowchart diagram showing the system architecture:\n\n\
         {context}\n\
         Include:\n\
         1. Main components and their relationships\n\
         2. Data flow\n\
         3. External services\n\
         4. Key processes\n\n\
         Respond only with the Mermaid.js diagram code."
    )
}

fn component_prompt(chunk: &Chunk) -> String {
    format!(
        "Generate detailed documentation for this code:\n{}\n\n\
         Include:\n\
         1. Purpose and responsibility\n\
         2. Parameters and return values\n\
         3. Dependencies\n\
         4. Usage examples\n\
         5. Important methods/properties",
        chunk.content
    )
}

/// Drop a surrounding ```mermaid ... ``` fence if the model added one.
fn strip_fences(text: &str) -> String {
    let trimmed = text.trim();
    let Some(body) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };
    let body = body.strip_suffix("```").unwrap_or(body);
    // Skip the info string (`mermaid`) on the opening line.
    match body.split_once('\n') {
        Some((_, rest)) => rest.trim().to_string(),
        None => body.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CallError;
    use crate::llm::Generator;
    use crate::models::ChunkKind;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct EchoGenerator {
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Generator for EchoGenerator {
        async fn generate(&self, prompt: &str) -> Result<String, CallError> {
            self.prompts.lock().push(prompt.to_string());
            if prompt.contains("Mermaid") {
                Ok("```mermaid\nflowchart TD\n  A --> B\n```".into())
            } else if prompt.contains("function f11()") {
                Err(CallError::Throttled("429".into()))
            } else if prompt.starts_with("Generate detailed documentation") {
                let name = prompt.split_whitespace().nth(6).unwrap_or_default();
                Ok(format!("\nDocs for {name}\n"))
            } else {
                Ok("  An example project.  ".into())
            }
        }
    }

    fn chunk(i: usize) -> Chunk {
        Chunk {
            kind: ChunkKind::Function,
            name: format!("f{i}"),
            content: format!("function f{i}() {{}}"),
            location: format!("src/f{i}.js"),
            ordinal: 0,
            start_byte: 0,
            end_byte: 0,
            start_line: 1,
            end_line: 1,
        }
    }

    fn chunk_of(kind: ChunkKind, name: &str, content: &str) -> Chunk {
        Chunk {
            kind,
            name: name.into(),
            content: content.into(),
            location: "src/cart.js".into(),
            ..chunk(0)
        }
    }

    fn echo() -> Arc<EchoGenerator> {
        Arc::new(EchoGenerator {
            prompts: Mutex::new(Vec::new()),
        })
    }

    #[tokio::test]
    async fn test_generate_uses_first_ten_chunks() {
        let generator = echo();
        let docs = DocumentationGenerator::new(generator.clone());
        let chunks: Vec<_> = (0..12).map(chunk).collect();

        let out = docs.generate(&chunks).await.unwrap();
        assert_eq!(out.overview, "An example project.");
        assert_eq!(out.architecture, "flowchart TD\n  A --> B");

        let prompts = generator.prompts.lock();
        // overview, diagram, then one per function
        assert_eq!(prompts.len(), 2 + 12);
        assert!(prompts[0].contains("Name: f9"));
        assert!(!prompts[0].contains("Name: f10"));
        // All functions are documented, not only the first ten; f11 failed.
        assert_eq!(out.components.len(), 11);
        assert_eq!(out.components[10].name, "f10");
    }

    #[tokio::test]
    async fn test_one_component_per_class_and_function() {
        let generator = echo();
        let docs = DocumentationGenerator::new(generator.clone());
        let chunks = vec![
            chunk_of(ChunkKind::Class, "Cart", "class Cart { total() {} }"),
            chunk_of(ChunkKind::Method, "Cart.total", "total() {}"),
            chunk_of(ChunkKind::Function, "checkout", "function checkout() {}"),
            chunk_of(ChunkKind::FileBlock, "cart.js-chunk-0", "const x = 1;"),
        ];

        let components = docs.document_components(&chunks).await;
        assert_eq!(
            components,
            vec![
                ComponentDoc {
                    name: "Cart".into(),
                    kind: ChunkKind::Class,
                    location: "src/cart.js".into(),
                    documentation: "Docs for class".into(),
                },
                ComponentDoc {
                    name: "checkout".into(),
                    kind: ChunkKind::Function,
                    location: "src/cart.js".into(),
                    documentation: "Docs for function".into(),
                },
            ]
        );

        let prompts = generator.prompts.lock();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[0].starts_with(
            "Generate detailed documentation for this code:\nclass Cart { total() {} }\n\nInclude:"
        ));
        assert!(prompts[0].ends_with("5. Important methods/properties"));
    }

    #[test]
    fn test_strip_fences() {
        assert_eq!(strip_fences("graph LR\nA-->B"), "graph LR\nA-->B");
        assert_eq!(strip_fences("```\ngraph LR\n```"), "graph LR");
    }
}
