// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// PERMISSÕES DE AÇÕES
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Estado das permissões - calculado a cada iteração.
///
/// Os cinco bits determinam quais variantes entram no schema de ação do
/// passo. O controller modula os bits para proibir repetir jogadas que
/// acabaram de falhar (ex: answer desligado por exatamente um passo depois
/// de uma resposta reprovada).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionPermissions {
    /// Pode executar busca na web
    pub search: bool,
    /// Pode visitar URLs
    pub visit: bool,
    /// Pode gerar perguntas de reflexão
    pub reflect: bool,
    /// Pode fornecer resposta
    pub answer: bool,
    /// Pode executar código
    pub code: bool,
}

impl ActionPermissions {
    /// Cria permissões com tudo habilitado
    pub fn all_enabled() -> Self {
        Self {
            search: true,
            visit: true,
            reflect: true,
            answer: true,
            code: true,
        }
    }

    /// Cria permissões com tudo desabilitado
    pub fn all_disabled() -> Self {
        Self {
            search: false,
            visit: false,
            reflect: false,
            answer: false,
            code: false,
        }
    }

    /// Permissões de Beast Mode (apenas answer)
    pub fn beast_mode() -> Self {
        Self {
            search: false,
            visit: false,
            reflect: false,
            answer: true,
            code: false,
        }
    }

    /// Lista de ações permitidas (para logging e schema)
    pub fn allowed_actions(&self) -> Vec<&'static str> {
        let mut actions = Vec::with_capacity(5);
        if self.search {
            actions.push("search");
        }
        if self.visit {
            actions.push("visit");
        }
        if self.reflect {
            actions.push("reflect");
        }
        if self.answer {
            actions.push("answer");
        }
        if self.code {
            actions.push("code");
        }
        actions
    }

    /// Verifica se pelo menos uma ação está permitida
    pub fn has_any_allowed(&self) -> bool {
        self.search || self.visit || self.reflect || self.answer || self.code
    }

    /// Verifica se uma ação específica está permitida
    pub fn is_allowed(&self, action_name: &str) -> bool {
        match action_name {
            "search" => self.search,
            "visit" => self.visit,
            "reflect" => self.reflect,
            "answer" => self.answer,
            "code" => self.code,
            _ => false,
        }
    }

    /// Cópia com answer desabilitado
    pub fn without_answer(mut self) -> Self {
        self.answer = false;
        self
    }

    /// Cópia com reflect desabilitado
    pub fn without_reflect(mut self) -> Self {
        self.reflect = false;
        self
    }

    /// Cópia com code desabilitado
    pub fn without_code(mut self) -> Self {
        self.code = false;
        self
    }

    /// Cópia com search desabilitado
    pub fn without_search(mut self) -> Self {
        self.search = false;
        self
    }
}

impl Default for ActionPermissions {
    fn default() -> Self {
        Self::all_enabled()
    }
}

impl std::fmt::Display for ActionPermissions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Permissions: [{}]", self.allowed_actions().join(", "))
    }
}
