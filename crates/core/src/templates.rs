//! Message template catalog seam. Placeholder substitution is the
//! catalog's responsibility; the campaign engine only supplies a template
//! id and a typed context map.

use std::collections::HashMap;

use crate::error::{ReclaimError, ReclaimResult};
use crate::types::Recipient;

pub trait TemplateCatalog: Send + Sync {
    fn render(
        &self,
        template_id: &str,
        recipient: &Recipient,
        context: &HashMap<String, String>,
    ) -> ReclaimResult<String>;
}

/// Static catalog using {{variable}} syntax. The recipient's first name is
/// always available as `{{first_name}}`; everything else comes from the
/// caller-supplied context.
pub struct StaticCatalog {
    templates: HashMap<String, String>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self {
            templates: HashMap::new(),
        }
    }

    pub fn register(&mut self, template_id: impl Into<String>, body: impl Into<String>) {
        self.templates.insert(template_id.into(), body.into());
    }

    pub fn contains(&self, template_id: &str) -> bool {
        self.templates.contains_key(template_id)
    }

    /// Catalog pre-loaded with the built-in campaign stage templates.
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        catalog.register(
            "reactivation_15d",
            "Oi {{first_name}}! Sentimos sua falta. Que tal voltar aos poucos? Responda aqui!",
        );
        catalog.register(
            "reactivation_30d",
            "{{first_name}}, faz um mês que você não aparece. Temos uma semana grátis te esperando!",
        );
        catalog.register(
            "reactivation_60d",
            "{{first_name}}, esta é nossa última mensagem. As portas seguem abertas quando quiser voltar.",
        );
        catalog.register(
            "nurturing_1d",
            "Oi {{first_name}}! Obrigado pela visita. Posso te ajudar com alguma dúvida?",
        );
        catalog.register(
            "nurturing_2d",
            "{{first_name}}, preparei algumas opções de plano que combinam com você.",
        );
        catalog.register(
            "nurturing_5d",
            "{{first_name}}, nossos horários alternativos podem facilitar sua rotina. Quer saber mais?",
        );
        catalog.register(
            "nurturing_10d",
            "{{first_name}}, ainda dá tempo de garantir a condição especial da sua visita.",
        );
        catalog.register(
            "nurturing_15d",
            "{{first_name}}, última chamada: a condição especial expira hoje. Respondendo aqui eu ativo pra você.",
        );
        catalog.register(
            "billing_1d",
            "Oi {{first_name}}, seu pagamento venceu ontem. Precisa da segunda via?",
        );
        catalog.register(
            "billing_3d",
            "{{first_name}}, seu pagamento está em aberto há 3 dias. Posso te mandar o link?",
        );
        catalog.register(
            "billing_7d",
            "{{first_name}}, uma semana de atraso. Vamos regularizar? Responda e resolvo agora.",
        );
        catalog.register(
            "billing_15d",
            "{{first_name}}, para evitar a suspensão do seu plano, regularize o pagamento em aberto.",
        );
        catalog
    }

    fn substitute(body: &str, variables: &HashMap<String, String>) -> String {
        let mut result = body.to_string();
        for (name, value) in variables {
            let placeholder = format!("{{{{{name}}}}}");
            result = result.replace(&placeholder, value);
        }
        result
    }
}

impl Default for StaticCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl TemplateCatalog for StaticCatalog {
    fn render(
        &self,
        template_id: &str,
        recipient: &Recipient,
        context: &HashMap<String, String>,
    ) -> ReclaimResult<String> {
        let body = self
            .templates
            .get(template_id)
            .ok_or_else(|| ReclaimError::TemplateNotFound(template_id.to_string()))?;

        let mut variables = context.clone();
        variables.insert("first_name".to_string(), recipient.first_name().to_string());
        variables.insert("display_name".to_string(), recipient.display_name.clone());

        Ok(Self::substitute(body, &variables))
    }
}
