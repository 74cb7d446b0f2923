//! Per-language prompt templates.
//!
//! [`Language`] is a closed set; [`Language::template`] is an exhaustive
//! match, so adding a language without its template does not compile.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Pt,
    En,
    Fr,
    Es,
}

impl Language {
    pub const ALL: [Language; 4] = [Language::Pt, Language::En, Language::Fr, Language::Es];

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Pt => "pt",
            Language::En => "en",
            Language::Fr => "fr",
            Language::Es => "es",
        }
    }

    pub fn template(&self) -> &'static PromptTemplate {
        match self {
            Language::Pt => &PT,
            Language::En => &EN,
            Language::Fr => &FR,
            Language::Es => &ES,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pt" | "pt-pt" | "pt-br" => Ok(Language::Pt),
            "en" | "en-us" | "en-gb" => Ok(Language::En),
            "fr" | "fr-fr" => Ok(Language::Fr),
            "es" | "es-es" => Ok(Language::Es),
            other => Err(Error::validation(format!(
                "unsupported language '{}'; expected pt, en, fr, or es",
                other
            ))),
        }
    }
}

/// Everything language-specific the assembler needs.
#[derive(Debug)]
pub struct PromptTemplate {
    pub system_prompt: &'static str,
    /// Line introducing the knowledge-base excerpts.
    pub context_heading: &'static str,
    /// Replies used when the chat model cannot be reached. Never empty.
    pub fallbacks: &'static [&'static str],
    /// Reply used when the model answers with no content.
    pub empty_reply: &'static str,
}

impl PromptTemplate {
    /// Fallback for a failed generation; `rate_limited` rotates to the
    /// second variant when one exists.
    pub fn fallback(&self, rate_limited: bool) -> &'static str {
        if rate_limited && self.fallbacks.len() > 1 {
            self.fallbacks[1]
        } else {
            self.fallbacks[0]
        }
    }
}

static PT: PromptTemplate = PromptTemplate {
    system_prompt: "Você é um assistente de IA prestável e profissional.

REGRAS:
- Dê prioridade à informação dos documentos da base de conhecimento quando existir
- Se a resposta estiver nos documentos, use-os como fonte principal
- Sem documentos relevantes, use o seu conhecimento geral para ajudar
- Seja claro, conciso e profissional
- Responda em português de Portugal
- Partilhe contactos ou formas de obter mais informação quando os documentos os mencionarem

FORMATAÇÃO:
- Use markdown
- Links sempre no formato [texto](URL COMPLETO)
- Nunca abrevie nem trunque URLs com \"...\"; copie-os exatamente como aparecem, com todos os parâmetros",
    context_heading: "Contexto adicional da base de conhecimento:",
    fallbacks: &[
        "Obrigado pela sua mensagem! O nosso assistente está temporariamente indisponível. Por favor, contacte-nos diretamente para assistência imediata.",
        "Lamentamos, estamos com dificuldades técnicas temporárias. A nossa equipa está disponível para ajudar pelos contactos habituais.",
    ],
    empty_reply: "Desculpe, não consegui gerar uma resposta.",
};

static EN: PromptTemplate = PromptTemplate {
    system_prompt: "You are a helpful and professional AI assistant.

RULES:
- Prefer information from the knowledge base documents when it is available
- If the answer is in the documents, use them as the primary source
- Without relevant documents, use your general knowledge to help
- Be clear, concise and professional
- Respond in English
- Share contacts or ways to get more information when the documents mention them

FORMATTING:
- Use markdown
- Always write links as [text](FULL URL)
- Never abbreviate or truncate URLs with \"...\"; copy them exactly as they appear, with every parameter",
    context_heading: "Additional context from the knowledge base:",
    fallbacks: &[
        "Thank you for your message! Our assistant is temporarily unavailable. Please contact us directly for immediate assistance.",
        "We apologize, we are experiencing temporary technical difficulties. Our team is available to help through the usual contacts.",
    ],
    empty_reply: "Sorry, I could not generate a response.",
};

static FR: PromptTemplate = PromptTemplate {
    system_prompt: "Vous êtes un assistant IA serviable et professionnel.

RÈGLES :
- Privilégiez les informations des documents de la base de connaissances lorsqu'elles existent
- Si la réponse se trouve dans les documents, utilisez-les comme source principale
- Sans document pertinent, utilisez vos connaissances générales pour aider
- Soyez clair, concis et professionnel
- Répondez en français
- Partagez les contacts ou moyens d'obtenir plus d'informations mentionnés dans les documents

FORMATAGE :
- Utilisez le markdown
- Écrivez toujours les liens sous la forme [texte](URL COMPLÈTE)
- N'abrégez ni ne tronquez jamais les URLs avec \"...\" ; copiez-les exactement, avec tous les paramètres",
    context_heading: "Contexte supplémentaire de la base de connaissances :",
    fallbacks: &[
        "Merci pour votre message ! Notre assistant est temporairement indisponible. Veuillez nous contacter directement pour une assistance immédiate.",
        "Nous sommes désolés, nous rencontrons des difficultés techniques temporaires. Notre équipe reste disponible par les contacts habituels.",
    ],
    empty_reply: "Désolé, je n'ai pas pu générer de réponse.",
};

static ES: PromptTemplate = PromptTemplate {
    system_prompt: "Eres un asistente de IA útil y profesional.

REGLAS:
- Prioriza la información de los documentos de la base de conocimientos cuando exista
- Si la respuesta está en los documentos, úsalos como fuente principal
- Sin documentos relevantes, usa tu conocimiento general para ayudar
- Sé claro, conciso y profesional
- Responde en español
- Comparte los contactos o formas de obtener más información que mencionen los documentos

FORMATO:
- Usa markdown
- Escribe siempre los enlaces como [texto](URL COMPLETA)
- Nunca abrevies ni trunques URLs con \"...\"; cópialas exactamente, con todos los parámetros",
    context_heading: "Contexto adicional de la base de conocimientos:",
    fallbacks: &[
        "¡Gracias por tu mensaje! Nuestro asistente no está disponible temporalmente. Por favor, contáctanos directamente para recibir ayuda inmediata.",
        "Lo sentimos, estamos teniendo dificultades técnicas temporales. Nuestro equipo está disponible a través de los contactos habituales.",
    ],
    empty_reply: "Lo siento, no pude generar una respuesta.",
};
