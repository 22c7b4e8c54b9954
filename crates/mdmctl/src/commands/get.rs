//! `mdmctl get <category> <id>`

use mdmctl_core::{Category, OpContext, Operator, RemoteObject};

use crate::cli::{GetArgs, GlobalOpts};
use crate::error::CliError;
use crate::output;

pub async fn handle(
    args: GetArgs,
    operator: &Operator,
    ctx: &OpContext,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let category = Category::new(args.category.as_str())?;
    let object = operator.get(ctx, &category, &args.id).await?;
    print_object(&object, global)
}

/// Print one remote object in the selected format.
pub(crate) fn print_object(object: &RemoteObject, global: &GlobalOpts) -> Result<(), CliError> {
    let rendered = output::render_single(global.output, object, detail, |o| o.id.clone())?;
    output::print_output(&rendered, global.quiet);
    Ok(())
}

fn detail(object: &RemoteObject) -> String {
    let width = object
        .properties
        .keys()
        .map(String::len)
        .max()
        .unwrap_or(0)
        .max("id".len());
    let mut lines = vec![format!("{:<width$}  {}", "id", object.id)];
    for (name, value) in &object.properties {
        let text = object
            .property_text(name)
            .unwrap_or_else(|| value.to_string());
        lines.push(format!("{name:<width$}  {text}"));
    }
    lines.join("\n")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn detail_aligns_properties() {
        let object = RemoteObject::from_value(
            "d1",
            json!({"deviceName": "LAPTOP-7", "enabled": true, "tags": ["a"]}),
        )
        .unwrap();
        assert_eq!(
            detail(&object),
            "id          d1\ndeviceName  LAPTOP-7\nenabled     true\ntags        [\"a\"]"
        );
    }
}
