/*
 * vDesk customer support engine
 * Copyright (C) 2023 viridIT SAS
 *
 * This program is free software: you can redistribute it and/or modify it under
 * the terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or any later version.
 *
 * This program is distributed in the hope that it will be useful, but WITHOUT
 * ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
 * FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * this program. If not, see https://www.gnu.org/licenses/.
 *
*/

/// The variable set every outbound template may reference. Unknown or unset
/// placeholders render empty rather than failing the send.
#[derive(Debug, Clone, Default)]
pub struct TemplateVars {
    ///
    pub ticket_id: String,
    ///
    pub customer_name: String,
    ///
    pub customer_email: String,
    ///
    pub subject: String,
    ///
    pub message: String,
    ///
    pub admin_name: String,
}

impl TemplateVars {
    fn get(&self, name: &str) -> Option<&str> {
        match name {
            "ticket_id" => Some(&self.ticket_id),
            "customer_name" => Some(&self.customer_name),
            "customer_email" => Some(&self.customer_email),
            "subject" => Some(&self.subject),
            "message" => Some(&self.message),
            "admin_name" => Some(&self.admin_name),
            _ => None,
        }
    }
}

/// Substitute every `{{var}}` placeholder. Whitespace inside the braces is
/// tolerated (`{{ subject }}`); anything that is not a known variable
/// renders as the empty string.
#[must_use]
pub fn render(template: &str, vars: &TemplateVars) -> String {
    let mut output = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        let (before, after_open) = rest.split_at(start);
        output.push_str(before);

        let Some(end) = after_open.find("}}") else {
            // unterminated placeholder, emit verbatim.
            output.push_str(after_open);
            return output;
        };

        #[allow(clippy::string_slice)]
        let name = after_open[2..end].trim();
        output.push_str(vars.get(name).unwrap_or_default());

        #[allow(clippy::string_slice)]
        {
            rest = &after_open[end + 2..];
        }
    }
    output.push_str(rest);
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn vars() -> TemplateVars {
        TemplateVars {
            ticket_id: "T-42".to_owned(),
            customer_name: "Ada".to_owned(),
            customer_email: "ada@customer.test".to_owned(),
            subject: "Password reset".to_owned(),
            message: "done".to_owned(),
            admin_name: "Bob".to_owned(),
        }
    }

    #[test]
    fn substitutes_known_variables() {
        assert_eq!(
            render("Hello {{customer_name}}, re: {{subject}}", &vars()),
            "Hello Ada, re: Password reset"
        );
    }

    #[test]
    fn whitespace_inside_braces_is_tolerated() {
        assert_eq!(render("{{ ticket_id }}", &vars()), "T-42");
    }

    #[test]
    fn unknown_variables_render_empty() {
        assert_eq!(render("[{{nope}}]", &vars()), "[]");
    }

    #[test]
    fn unterminated_placeholder_is_left_alone() {
        assert_eq!(render("broken {{subject", &vars()), "broken {{subject");
    }

    #[test]
    fn rendering_is_deterministic() {
        let template = "{{admin_name}} answered {{customer_name}}";
        assert_eq!(render(template, &vars()), render(template, &vars()));
    }
}
