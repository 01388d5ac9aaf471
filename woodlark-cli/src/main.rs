use std::{fs::File, io::Write, process::ExitCode};

use clap::Parser;
use woodlark::{
    ParserOption, XMLError, XMLEvent, XMLStreamError, XMLStreamReader, XMLStreamReaderBuilder,
    XMLStreamWriter, handler::ProblemCollector,
};

#[derive(clap::Parser, Debug)]
#[command(name = "woodlark", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Print the event stream of each document.
    Inspect {
        #[clap(long, help = "merge adjacent text into one event")]
        coalesce: bool,
        #[clap(long, help = "report entity references instead of expanding them")]
        no_expand: bool,
        #[clap(long, help = "disable namespace processing")]
        no_namespaces: bool,
        #[clap(required = true)]
        documents: Vec<String>,
    },
    /// Validate each document against its DTD and print one line per problem.
    Validate {
        #[clap(long, help = "do not load external entities or the external subset")]
        no_external: bool,
        #[clap(required = true)]
        documents: Vec<String>,
    },
    /// Print an external DTD with parameter entities and conditional sections resolved.
    Flatten { dtd: String },
    /// Read a document and write it back out.
    Copy {
        #[clap(long, default_value = "UTF-8", help = "output encoding")]
        encoding: String,
        document: String,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let result = match cli.command {
        Command::Inspect {
            coalesce,
            no_expand,
            no_namespaces,
            documents,
        } => {
            let mut builder = XMLStreamReaderBuilder::new();
            if coalesce {
                builder = builder.enable_option(ParserOption::Coalescing);
            }
            if no_expand {
                builder = builder.disable_option(ParserOption::ReplaceEntityReferences);
            }
            if no_namespaces {
                builder = builder.disable_option(ParserOption::Namespaces);
            }
            let mut reader = builder.build();
            let mut failed = false;
            for document in documents {
                if let Err(err) = do_inspect(&mut reader, &document) {
                    eprintln!("{err}");
                    failed = true;
                }
            }
            Ok(!failed)
        }
        Command::Validate {
            no_external,
            documents,
        } => Ok(do_validate(no_external, documents)),
        Command::Flatten { dtd } => do_flatten(&dtd).map(|_| true),
        Command::Copy { encoding, document } => do_copy(&document, &encoding).map(|_| true),
    };
    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn do_inspect(reader: &mut XMLStreamReader, document: &str) -> Result<(), XMLStreamError> {
    reader.parse_uri(document)?;
    loop {
        match reader.next_event()? {
            XMLEvent::StartDocument(decl) => println!(
                "startDocument({}, {}, {})",
                decl.version().map_or("None".to_owned(), |v| format!("{v:?}")),
                decl.encoding().unwrap_or("None"),
                decl.standalone()
                    .map_or("None", |standalone| if standalone { "yes" } else { "no" })
            ),
            XMLEvent::EndDocument => println!("endDocument()"),
            XMLEvent::StartElement(start) => {
                print!(
                    "startElement({}, {}, {}, {}",
                    start.namespace_uri().unwrap_or("None"),
                    start.prefix().unwrap_or("None"),
                    start.local_name().unwrap_or("None"),
                    start.name()
                );
                for att in start.attributes().iter() {
                    print!(", ");
                    if let Some(uri) = att.uri.as_deref() {
                        print!("{{{uri}}}");
                    }
                    print!("{}='{}'", att.qname, att.value);
                }
                println!(")");
            }
            XMLEvent::EndElement(end) => println!(
                "endElement({}, {}, {}, {})",
                end.namespace_uri().unwrap_or("None"),
                end.prefix().unwrap_or("None"),
                end.local_name().unwrap_or("None"),
                end.name()
            ),
            XMLEvent::DocumentType(doctype) => println!(
                "documentType({}, {}, {})",
                doctype.name(),
                doctype.public_id().unwrap_or("None"),
                doctype.system_id().unwrap_or("None")
            ),
            XMLEvent::Characters(text) => println!("characters({text})"),
            XMLEvent::CData(text) => println!("cdataSection({text})"),
            XMLEvent::Space(text) => println!("space({text})"),
            XMLEvent::Comment(text) => println!("comment({text})"),
            XMLEvent::ProcessingInstruction(pi) => println!(
                "processingInstruction({}, '{}')",
                pi.target(),
                pi.data().unwrap_or("None")
            ),
            XMLEvent::EntityReference(entity) => println!("entityReference({})", entity.name()),
            XMLEvent::EndOfInput => break,
        }
    }
    Ok(())
}

/// Returns `false` if any document has a problem. A document that fails fatally does not
/// stop the remaining ones.
fn do_validate(no_external: bool, documents: Vec<String>) -> bool {
    let problems = ProblemCollector::default();
    let mut builder = XMLStreamReaderBuilder::new()
        .enable_option(ParserOption::Validation)
        .set_error_handler(problems.clone());
    if no_external {
        builder = builder
            .disable_option(ParserOption::ExternalGeneralEntities)
            .disable_option(ParserOption::ExternalParameterEntities);
    }
    let mut reader = builder.build();

    let mut valid = true;
    for document in documents {
        let result = reader.parse_uri(&document).and_then(|_| {
            while !matches!(reader.next_event()?, XMLEvent::EndOfInput) {}
            Ok(())
        });
        let found = problems.take();
        if let Err(err) = &result
            && found.iter().all(|problem| !problem.is_fatal())
        {
            // failures opening the document are not reported to the handler
            println!("{document}: {err}");
        }
        for problem in &found {
            println!("{problem}");
        }
        if result.is_ok() && found.is_empty() {
            println!("{document}: valid");
        } else {
            valid = false;
        }
    }
    valid
}

fn do_flatten(path: &str) -> Result<(), XMLStreamError> {
    let file = File::open(path).map_err(XMLError::from)?;
    let mut reader = XMLStreamReaderBuilder::new().build();
    let dtd = reader.read_dtd(file, None, Some(path))?;
    print!("{}", dtd.to_dtd_string());
    Ok(())
}

fn do_copy(document: &str, encoding: &str) -> Result<(), XMLStreamError> {
    let mut reader = XMLStreamReaderBuilder::new().build();
    reader.parse_uri(document)?;
    let mut writer = XMLStreamWriter::with_encoding(std::io::stdout().lock(), encoding)?;
    loop {
        match reader.next_event()? {
            XMLEvent::StartDocument(decl) => writer.write_start_document(decl.standalone())?,
            XMLEvent::StartElement(start) => {
                if start.is_empty() {
                    writer.write_empty_element(start.name())?;
                } else {
                    writer.write_start_element(start.name())?;
                }
                for ns in start.namespaces() {
                    writer.write_namespace(ns.prefix.as_deref(), &ns.uri)?;
                }
                for att in start.attributes().iter().filter(|att| att.is_specified()) {
                    writer.write_attribute(&att.qname, &att.value)?;
                }
            }
            XMLEvent::EndElement(end) => {
                if !end.is_empty() {
                    writer.write_end_element()?;
                }
            }
            XMLEvent::Characters(text) | XMLEvent::Space(text) => {
                if writer.depth() > 0 {
                    writer.write_characters(&text)?;
                }
            }
            XMLEvent::CData(text) => writer.write_cdata(&text)?,
            XMLEvent::Comment(text) => writer.write_comment(&text)?,
            XMLEvent::ProcessingInstruction(pi) => {
                writer.write_processing_instruction(pi.target(), pi.data())?
            }
            XMLEvent::EndOfInput => break,
            XMLEvent::DocumentType(_) | XMLEvent::EntityReference(_) | XMLEvent::EndDocument => {}
        }
    }
    let mut out = writer.finish()?;
    writeln!(out).map_err(XMLError::from)?;
    Ok(())
}
