use minijinja::{context, Environment, Value};

const PERSONA_TEMPLATE: &str = include_str!("prompts/persona.j2");
const TASK_TEMPLATE: &str = include_str!("prompts/task.j2");
const CLASSIFY_TEMPLATE: &str = include_str!("prompts/classify_intent.j2");
const EXTRACT_DELAY_TEMPLATE: &str = include_str!("prompts/extract_delay.j2");

fn render(name: &str, source: &str, ctx: Value) -> Option<String> {
    let mut env = Environment::new();
    env.set_trim_blocks(true);
    env.set_lstrip_blocks(true);
    env.add_template(name, source).ok()?;
    let template = env.get_template(name).ok()?;
    template.render(ctx).ok().map(|text| text.trim().to_string())
}

pub fn render_persona() -> String {
    render("persona", PERSONA_TEMPLATE, context! {}).unwrap_or_else(fallback_persona)
}

fn fallback_persona() -> String {
    "Sos un asistente de barbería. Tono cercano: \"bro\", \"hermano\", \"amigo\".\n\
     Respondé según la información que recibís. Sé breve y natural.\n\
     Idioma: español. No uses formato Markdown."
        .to_string()
}

pub struct TaskContext<'a> {
    pub intent: &'a str,
    pub message: &'a str,
    pub has_context: bool,
}

/// Instruction block for a reply: persona, what to do for the intent, and the
/// customer's message.
pub fn render_task(ctx: &TaskContext<'_>) -> String {
    render(
        "task",
        TASK_TEMPLATE,
        context! {
            persona => render_persona(),
            intent => ctx.intent,
            message => ctx.message,
            has_context => ctx.has_context,
        },
    )
    .unwrap_or_else(|| fallback_task(ctx))
}

fn fallback_task(ctx: &TaskContext<'_>) -> String {
    let mut prompt = fallback_persona();
    if !ctx.intent.trim().is_empty() {
        prompt.push_str(&format!("\nTema de la consulta: {}.", ctx.intent.trim()));
    }
    prompt.push_str(&format!("\nMensaje del cliente: \"{}\"", ctx.message));
    prompt
}

pub fn render_classifier_prompt(message: &str, keys: &[String]) -> String {
    render(
        "classify_intent",
        CLASSIFY_TEMPLATE,
        context! { message => message, keys => keys },
    )
    .unwrap_or_else(|| {
        format!(
            "Analizá este mensaje del usuario: \"{message}\"\n\nClaves disponibles:\n{}\n\n\
             Respondé SOLO con JSON: {{\"intencion\": \"...\", \"clave\": \"...\"}} o \
             {{\"intencion\": null, \"clave\": null}}.",
            keys.join(", ")
        )
    })
}

pub fn render_delay_extraction_prompt(message: &str) -> String {
    render(
        "extract_delay",
        EXTRACT_DELAY_TEMPLATE,
        context! { message => message },
    )
    .unwrap_or_else(|| {
        format!(
            "Extraé hora_turno, hora_llegada y minutos_demora como JSON del mensaje: \"{message}\""
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persona_sets_tone() {
        let persona = render_persona();
        assert!(persona.starts_with("Sos un asistente de barbería."));
        assert!(persona.ends_with("No uses formato Markdown."));
    }

    #[test]
    fn task_picks_instruction_for_intent() {
        let greeting = render_task(&TaskContext {
            intent: "saludo_inicial",
            message: "hola",
            has_context: false,
        });
        assert!(greeting.contains("presentate como el asistente"));
        assert!(greeting.contains("Es el comienzo de la conversación."));
        assert!(greeting.ends_with("Mensaje del cliente: \"hola\""));

        let topic = render_task(&TaskContext {
            intent: "barba",
            message: "hacen barba?",
            has_context: true,
        });
        assert!(topic.contains("Tema de la consulta: barba."));
        assert!(!topic.contains("comienzo de la conversación"));
    }

    #[test]
    fn classifier_lists_keys_and_keeps_json_braces() {
        let prompt = render_classifier_prompt(
            "che bro cómo saco turno pa mañana?",
            &["turnos.turno_hoy".to_string(), "precios.cuanto_sale".to_string()],
        );
        assert!(prompt.contains("turnos.turno_hoy, precios.cuanto_sale"));
        assert!(prompt.contains("{\"intencion\": null, \"clave\": null}"));
    }

    #[test]
    fn delay_prompt_embeds_message() {
        let prompt = render_delay_extraction_prompt("llego 10 min tarde");
        assert!(prompt.contains("Mensaje: \"llego 10 min tarde\""));
        assert!(prompt.contains("minutos_demora"));
    }
}
