//! Barbershop knowledge base: one paragraph per intent plus the price table.

pub const ADDRESS: &str = "Juan José de Amézaga 2241";

const SERVICIO: &str = "SERVICIO PRINCIPAL DE LA BARBERÍA:

El servicio se basa en cortes personalizados según el rostro del cliente (visagismo). No se hacen cortes genéricos, sino que se analiza:
- Estructura craneal
- Tipo de rostro
- Tipo de cabello
- Volumen, densidad, dirección de crecimiento

A partir de eso se decide qué corte va mejor con la fisonomía y el estilo personal. El objetivo es resaltar los rasgos de cada cliente.

EXPERIENCIA DEL CLIENTE:

Además del corte, cuidamos que cada visita sea cómoda y relajada.
Trabajamos solo con turnos para que no tengas que esperar: llegás y te atendemos.
Mientras esperás o terminás tu corte, podés tomarte un café tranquilo, charlar, estar en un ambiente piola, sin apuros.
Queremos que te sientas como en casa.";

const DIFERENCIAL: &str = "DIFERENCIAL DEL SERVICIO:

Cortes basados en visagismo: analizamos el rostro y creamos un corte a medida. Además, trabajamos el styling con productos y herramientas para que el cliente se vea como quiere.

Trabajamos solo con turnos para que no tengas que esperar: llegás y te atendemos.
Mientras esperás o terminás tu corte, podés tomarte un café tranquilo, charlar, estar en un ambiente piola, sin apuros.
Queremos que te sientas como en casa.";

const BARBA: &str = "SERVICIOS DE BARBA:

Sí, se realizan trabajos de barba, también en base al tipo de rostro.

Al igual que con los cortes, analizamos tu tipo de rostro y barba para crear un estilo que te quede perfecto.";

const NINOS_MUJERES: &str = "ATENCIÓN A NIÑOS Y MUJERES:

Según el enfoque del local. Si solo es barbería masculina, responder cortésmente. Si también se atiende, aclararlo.";

const PRODUCTOS_LC: &str = "PRODUCTOS EXCLUSIVOS LC:

También se venden productos de la marca LC para mantener el corte perfecto todos los días.

PRODUCTOS DISPONIBLES (Valor: $500 cada uno):

1. Cera modeladora brillo:
   - Para pelos más porosos y gruesos a los cuales les falta brillo y son muy opacos
   - Ideal para peinar cortes más clásicos

2. Cera en polvo:
   - Para darle más textura al pelo
   - Ideal para pelo lacio y dar volumen

3. Cera mate:
   - Un efecto más cremoso que la cera en polvo
   - También genera ese efecto opaco y de textura
   - Ideal para pelos más lacios para generar efecto de textura

4. Cera mate brillo:
   - Similar a la cera mate pero aporta un poco más de brillo que la cera en polvo

BENEFICIOS:
- Te ayudan a mantener la forma, volumen y textura del corte día a día
- Son productos que usamos en la barbería y que recomendamos porque dan resultado

CÓMO COMPRARLOS:
- Reservar el producto para retirarlo en la barbería
- Consultar stock
- Derivar si quiere info más detallada de uso o precios";

const VISAGISMO_REDONDO: &str = "VISAGISMO - ROSTRO REDONDO:

Características:
- Mejillas anchas
- Contornos suaves
- Poca definición en mandíbula

Objetivo:
- Alargar el rostro y generar ángulos, ya sea con la barba o contornos

Recomendaciones:
- Evitar volumen en los laterales (puede servir en casos puntuales)
- Volumen arriba (pompadour, quiff o french crop texturizado)
- Degradados altos (puede variar dependiendo el cliente)
- Barba corta o líneas rectas para estilizar";

const VISAGISMO_CUADRADO: &str = "VISAGISMO - ROSTRO CUADRADO:

Características:
- Mandíbula marcada
- Frente ancha

Objetivo:
- Suavizar o marcar según el estilo

Recomendaciones:
- Fades medios o bajos
- Textura arriba sin mucho volumen
- Barba prolija o para afinar";

const VISAGISMO_OVALADO: &str = "VISAGISMO - ROSTRO OVALADO:

Características:
- Proporciones equilibradas

Objetivo:
- Mantener la armonía

Recomendaciones:
- Casi todos los estilos funcionan
- Evitar flequillo cerrado
- Fades bajos o medios";

const VISAGISMO_ALARGADO: &str = "VISAGISMO - ROSTRO ALARGADO O RECTANGULAR:

Características:
- Más largo que ancho

Objetivo:
- Acortar visualmente

Recomendaciones:
- No mucho volumen arriba (a veces se puede estirar el rostro)
- Volumen en laterales
- Barbas completas o tipo \"tres días\"";

const VISAGISMO_DIAMANTE: &str = "VISAGISMO - ROSTRO DIAMANTE:

Características:
- Pómulos anchos
- Frente y mentón angostos

Objetivo:
- Equilibrar parte superior e inferior

Recomendaciones:
- Volumen moderado arriba y a los lados
- Evitar rapados extremos
- Barba que ensanche mandíbula";

const VISAGISMO_TRIANGULAR: &str = "VISAGISMO - ROSTRO TRIANGULAR (BASE ANCHA):

Características:
- Mandíbula más ancha que la frente

Objetivo:
- Compensar proporciones

Recomendaciones:
- Volumen arriba
- No cortar mucho los laterales
- Barba recortada";

const VISAGISMO_ENTRADAS: &str = "VISAGISMO - ENTRADAS O CALVICIE INCIPIENTE:

Características:
- Entradas pronunciadas o pérdida frontal

Objetivo:
- Disimular

Recomendaciones:
- Fade alto: sacar masa de los laterales para que parezca que hay más pelo arriba
- Peinados hacia adelante (crop fringe)
- Textura arriba
- Evitar exponer la frente";

const FAQ: &str = "PREGUNTAS FRECUENTES:

¿Cuál es el diferencial?
Cortes basados en visagismo: analizamos el rostro y creamos un corte a medida. Además, trabajamos el styling con productos y herramientas para que el cliente se vea como quiere.

¿Atienden con turno?
Sí, solo con turno. El bot debe derivar a link de turnos o pedir día y horario de preferencia.

¿Precios?
Los precios varían según el tipo de corte y servicio. Te paso la lista o te asesoro según lo que estés buscando.

¿Hacen barbas?
Sí, se realizan trabajos de barba, también en base al tipo de rostro.

¿Trabajan con niños o mujeres?
Según el enfoque del local. Si solo es barbería masculina, responder cortésmente. Si también se atiende, aclararlo.";

const CORTES: &str = "INFORMACIÓN SOBRE CORTES:

El servicio se basa en cortes personalizados según el rostro del cliente (visagismo). No se hacen cortes genéricos, sino que se analiza:
- Estructura craneal
- Tipo de rostro
- Tipo de cabello
- Volumen, densidad, dirección de crecimiento

A partir de eso se decide qué corte va mejor con la fisonomía y el estilo personal. El objetivo es resaltar los rasgos de cada cliente.

Trabajamos solo con turnos para que no tengas que esperar: llegás y te atendemos.";

const UBICACION: &str = "UBICACIÓN:

Estamos en Juan José de Amézaga 2241, Montevideo.
Trabajamos solo con turnos.";

/// Static paragraph for an intent, or `None` for intents without one.
pub fn paragraph(intent: &str) -> Option<&'static str> {
    let text = match intent {
        "turnos" => SERVICIO,
        "cortes" => CORTES,
        "diferencial" => DIFERENCIAL,
        "barba" => BARBA,
        "productos_lc" => PRODUCTOS_LC,
        "ubicacion" => UBICACION,
        "visagismo_redondo" => VISAGISMO_REDONDO,
        "visagismo_cuadrado" => VISAGISMO_CUADRADO,
        "visagismo_ovalado" => VISAGISMO_OVALADO,
        "visagismo_alargado" => VISAGISMO_ALARGADO,
        "visagismo_diamante" => VISAGISMO_DIAMANTE,
        "visagismo_triangular" => VISAGISMO_TRIANGULAR,
        "visagismo_entradas" => VISAGISMO_ENTRADAS,
        "preguntas_frecuentes" => FAQ,
        "niños_mujeres" => NINOS_MUJERES,
        _ => return None,
    };
    Some(text)
}

/// Knowledge block fed to prompts. Prices are resolved against the message so
/// the model sees the specific service first.
pub fn info_for_intent(intent: &str, text: &str) -> String {
    if intent == "precios" {
        return prices_for_prompt(text);
    }
    paragraph(intent).map(str::to_string).unwrap_or_default()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServicePrice {
    pub key: &'static str,
    pub name: &'static str,
    pub price: u32,
    keywords: &'static [&'static str],
}

pub const PRICES: &[ServicePrice] = &[
    ServicePrice {
        key: "corte",
        name: "Corte + asesoramiento",
        price: 500,
        keywords: &["corte", "cortes", "pelado", "pelo", "cabello", "visagismo", "asesoramiento"],
    },
    ServicePrice {
        key: "corte_barba",
        name: "Corte + asesoramiento + barba",
        price: 600,
        keywords: &["corte y barba", "corte+barba", "corte con barba", "ambos", "los dos", "completo"],
    },
    ServicePrice {
        key: "barba_perfilada",
        name: "Barba perfilada",
        price: 250,
        keywords: &["barba perfilada", "perfilada", "perfilar barba", "arreglar barba"],
    },
    ServicePrice {
        key: "barba_afeitada",
        name: "Barba afeitada",
        price: 200,
        keywords: &["barba afeitada", "afeitada", "afeitar", "afeitar barba", "rasurar"],
    },
    ServicePrice {
        key: "cejas",
        name: "Cejas en base a visagismo",
        price: 50,
        keywords: &["cejas", "ceja", "cejas visagismo"],
    },
];

/// Service mentioned in `text`. The longest matching keyword wins, so
/// "corte y barba" resolves to the combo rather than the plain cut.
pub fn find_price(text: &str) -> Option<&'static ServicePrice> {
    let lower = text.trim().to_lowercase();
    if lower.is_empty() {
        return None;
    }
    if let Some(service) = PRICES.iter().find(|s| s.name.to_lowercase() == lower) {
        return Some(service);
    }
    PRICES
        .iter()
        .flat_map(|service| service.keywords.iter().map(move |kw| (service, *kw)))
        .filter(|(_, kw)| lower.contains(kw))
        .max_by_key(|(_, kw)| kw.chars().count())
        .map(|(service, _)| service)
}

pub fn price_list() -> String {
    PRICES
        .iter()
        .map(|s| format!("• {} → ${}", s.name, s.price))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn prices_for_prompt(text: &str) -> String {
    match find_price(text) {
        Some(service) => format!(
            "PRECIOS:\n{} → ${}\n\nSi el cliente pregunta por otro servicio, aquí está la lista completa:\n{}",
            service.name,
            service.price,
            price_list()
        ),
        None => format!(
            "PRECIOS:\n{}\n\nIMPORTANTE: Estos son los precios oficiales. Úsalos exactamente como están. NO inventes precios ni modifiques estos valores.",
            price_list()
        ),
    }
}
