use crate::core::graph::{Operation, ProcessingGraph};
use crate::types::{SarError, SarResult};
use quick_xml::events::{BytesDecl, BytesText, Event};
use quick_xml::Writer;
use std::path::Path;

/// Graph document version understood by the engine
pub const GRAPH_VERSION: &str = "1.0";

fn xml_error(e: quick_xml::Error) -> SarError {
    SarError::XmlWriting(e.to_string())
}

/// Serialize a processing graph to the engine's XML graph format.
///
/// Each operator becomes a `<node>` whose single source is the previous node.
/// The Write node's file is resolved against `work_dir`.
pub fn to_xml(graph: &ProcessingGraph, work_dir: &Path) -> SarResult<String> {
    let operations = graph.operations();
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(xml_error)?;

    writer
        .create_element("graph")
        .with_attribute(("id", "Graph"))
        .write_inner_content(|w| {
            w.create_element("version")
                .write_text_content(BytesText::new(GRAPH_VERSION))?;

            let mut previous: Option<&'static str> = None;
            for op in &operations {
                write_node(w, op, previous, work_dir)?;
                previous = Some(op.node_id());
            }
            Ok(())
        })
        .map_err(xml_error)?;

    String::from_utf8(writer.into_inner())
        .map_err(|e| SarError::XmlWriting(format!("Graph is not valid UTF-8: {}", e)))
}

fn write_node(
    w: &mut Writer<Vec<u8>>,
    op: &Operation,
    source: Option<&'static str>,
    work_dir: &Path,
) -> quick_xml::Result<()> {
    let mut parameters = op.parameters();
    if let Operation::Write(write) = op {
        for (name, value) in parameters.iter_mut() {
            if *name == "file" {
                *value = work_dir.join(write.file_name()).display().to_string();
            }
        }
    }

    w.create_element("node")
        .with_attribute(("id", op.node_id()))
        .write_inner_content(|w| {
            w.create_element("operator")
                .write_text_content(BytesText::new(op.node_id()))?;

            match source {
                Some(refid) => {
                    w.create_element("sources").write_inner_content(|w| {
                        w.create_element("sourceProduct")
                            .with_attribute(("refid", refid))
                            .write_empty()?;
                        Ok::<(), quick_xml::Error>(())
                    })?;
                }
                None => {
                    w.create_element("sources").write_empty()?;
                }
            }

            w.create_element("parameters")
                .with_attribute(("class", "com.bc.ceres.binding.dom.XppDomElement"))
                .write_inner_content(|w| {
                    for (name, value) in &parameters {
                        if value.is_empty() {
                            w.create_element(*name).write_empty()?;
                        } else {
                            w.create_element(*name)
                                .write_text_content(BytesText::new(value))?;
                        }
                    }
                    Ok::<(), quick_xml::Error>(())
                })?;
            Ok::<(), quick_xml::Error>(())
        })?;
    Ok(())
}
