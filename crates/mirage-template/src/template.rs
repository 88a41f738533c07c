use crate::ast::Node;
use crate::context::RenderContext;
use crate::error::TemplateError;
use crate::eval::Renderer;
use crate::parser::parse_template;

/// A compiled mapping template.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    source: String,
    nodes: Vec<Node>,
}

impl Template {
    pub fn compile(source: &str) -> Result<Self, TemplateError> {
        let nodes = parse_template(source).map_err(|(offset, reason)| TemplateError::Compile {
            source_text: source.to_string(),
            offset,
            reason,
        })?;
        Ok(Template {
            source: source.to_string(),
            nodes,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Render against `ctx`. Undefined references render as empty text.
    pub fn render(&self, ctx: &RenderContext<'_>) -> Result<String, TemplateError> {
        let mut out = String::with_capacity(self.source.len());
        Renderer::new(ctx).render(&self.nodes, &mut out)?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::{json, Map, Value};

    use super::*;
    use crate::context::{Input, Params};

    struct Fixture {
        context: Value,
        params: Params,
        payload: Value,
        body: String,
        stage_variables: BTreeMap<String, String>,
    }

    impl Fixture {
        fn new() -> Self {
            Fixture {
                context: json!({}),
                params: Params::default(),
                payload: json!({}),
                body: String::new(),
                stage_variables: BTreeMap::new(),
            }
        }

        fn render(&self, source: &str) -> String {
            self.try_render(source).unwrap()
        }

        fn try_render(&self, source: &str) -> Result<String, TemplateError> {
            let ctx = RenderContext {
                context: &self.context,
                input: Input {
                    params: &self.params,
                    payload: &self.payload,
                    body: &self.body,
                },
                stage_variables: &self.stage_variables,
            };
            Template::compile(source).unwrap().render(&ctx)
        }
    }

    fn map(pairs: &[(&str, &str)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
            .collect()
    }

    #[test]
    fn input_body() {
        let mut fixture = Fixture::new();
        fixture.body = r#"{"raw":"body"}"#.into();
        assert_eq!(fixture.render("$input.body"), r#"{"raw":"body"}"#);
    }

    #[test]
    fn input_params_dump() {
        let mut fixture = Fixture::new();
        fixture.params = Params {
            path: map(&[("a", "a")]),
            querystring: map(&[("b", "b")]),
            headers: map(&[("c", "c")]),
        };
        assert_eq!(
            fixture.render("$input.params()"),
            "{path={a=a}, querystring={b=b}, headers={c=c}}"
        );
    }

    #[test]
    fn input_params_lookup_order() {
        let mut fixture = Fixture::new();
        fixture.params = Params {
            path: map(&[("x", "param")]),
            querystring: map(&[("x", "query")]),
            headers: map(&[("x", "header")]),
        };
        assert_eq!(fixture.render("$input.params(\"x\")"), "param");
        fixture.params.path.clear();
        assert_eq!(fixture.render("$input.params('x')"), "query");
        fixture.params.querystring.clear();
        assert_eq!(fixture.render("$input.params('x')"), "header");
        fixture.params.headers.clear();
        assert_eq!(fixture.render("[$input.params('x')]"), "[]");
    }

    #[test]
    fn input_json_and_path() {
        let mut fixture = Fixture::new();
        fixture.payload = json!({ "x": { "y": "test" }, "list": [1, 2, 3] });
        assert_eq!(fixture.render("$input.json(\"$.x\")"), r#"{"y":"test"}"#);
        assert_eq!(fixture.render("$input.json('$.missing')"), "");
        assert_eq!(fixture.render("$input.path('$.x').y"), "test");
        assert_eq!(fixture.render("$input.path('$.list').size()"), "3");
    }

    #[test]
    fn util_functions() {
        let fixture = Fixture::new();
        assert_eq!(
            fixture.render(r#"$util.escapeJavaScript('{"x":"test"}')"#),
            r#"{\"x\":\"test\"}"#
        );
        assert_eq!(fixture.render(r#"$util.parseJson('{"x":"test"}').x"#), "test");
        assert_eq!(fixture.render("$util.urlEncode('a b')"), "a%20b");
        assert_eq!(fixture.render("$util.urlDecode('a%20b')"), "a b");
        assert_eq!(fixture.render("$util.base64Encode('test')"), "dGVzdA==");
        assert_eq!(fixture.render("$util.base64Decode('dGVzdA==')"), "test");
    }

    #[test]
    fn context_and_stage_variables() {
        let mut fixture = Fixture::new();
        fixture.context = json!({ "stage": "local", "authorizer": { "principalId": "user-1" } });
        fixture.stage_variables.insert("env".into(), "prod".into());
        assert_eq!(
            fixture.render("$context.stage/$context.authorizer.principalId/$stageVariables.env"),
            "local/user-1/prod"
        );
    }

    #[test]
    fn undefined_renders_empty() {
        let fixture = Fixture::new();
        assert_eq!(fixture.render("a${nothing}b$!nothing.deeper()c$input.nope"), "abc");
    }

    #[test]
    fn set_if_and_foreach() {
        let mut fixture = Fixture::new();
        fixture.payload = json!({ "items": ["a", "b", "c"], "limit": 2 });
        let source = "#set($n = $input.path('$.limit'))\
                      [#foreach($item in $input.path('$.items'))\
                      #if($foreach.index < $n)\"$item\"#if($foreach.hasNext),#end#end\
                      #end]";
        assert_eq!(fixture.render(source), r#"["a","b",]"#);
    }

    #[test]
    fn json_object_template() {
        let mut fixture = Fixture::new();
        fixture.payload = json!({ "name": "x", "tags": ["t1", "t2"] });
        let source = r#"{"name": $input.json('$.name'), "count": $input.path('$.tags').size(), "first": "$input.path('$.tags')[0]"}"#;
        let rendered = fixture.render(source);
        let parsed: Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(parsed, json!({ "name": "x", "count": 2, "first": "t1" }));
    }

    #[test]
    fn elseif_chain_and_ranges() {
        let fixture = Fixture::new();
        let source = "#foreach($i in [1..4])#if($i % 2 == 0)e#elseif($i == 3)t#{else}o#end#end";
        assert_eq!(fixture.render(source), "oete");
        assert_eq!(fixture.render("#foreach($i in [3..1])$i#end"), "321");
    }

    #[test]
    fn oversized_ranges_are_rejected() {
        let mut fixture = Fixture::new();
        fixture.payload = json!({ "n": 100000 });
        let err = fixture
            .try_render("#foreach($i in [0..$input.path('$.n')])$i#end")
            .unwrap_err();
        assert!(matches!(err, TemplateError::Render(_)));
        assert!(fixture.try_render("#foreach($i in [0..-10000])#end").is_err());
        assert_eq!(fixture.render("#set($r = [0..9999])$r.size()"), "10000");
    }

    #[test]
    fn input_json_root_reparses_to_payload() {
        let mut fixture = Fixture::new();
        let payloads = [
            json!({ "quote": "say \"hi\"", "path": "a\\b", "line": "x\ny\t", "ctl": "\u{1}" }),
            json!({ "greeting": "grüße", "kanji": "日本", "emoji": "🦀" }),
            json!([1, "two", { "three": [3.5, null, true] }]),
            json!("plain string"),
            json!(null),
            json!(-42),
            json!(6.25),
            json!({}),
        ];
        for payload in payloads {
            fixture.payload = payload.clone();
            let rendered = fixture.render("$input.json('$')");
            let parsed: Value = serde_json::from_str(&rendered).unwrap();
            assert_eq!(parsed, payload, "{rendered}");
        }
    }

    #[test]
    fn maps_lists_and_set_property() {
        let fixture = Fixture::new();
        let source = "#set($m = {'a': 1, \"b\": [true, null]})#set($m.c = 'x')$m $m.keySet() $m.get('b').size()";
        assert_eq!(fixture.render(source), "{a=1, b=[true, ], c=x} [a, b, c] 2");
    }

    #[test]
    fn interpolated_strings() {
        let mut fixture = Fixture::new();
        fixture.stage_variables.insert("env".into(), "dev".into());
        assert_eq!(
            fixture.render("#set($k = \"key-$stageVariables.env\")$k.toUpperCase() '$k'"),
            "KEY-DEV 'key-dev'"
        );
    }

    #[test]
    fn foreach_restores_outer_variable() {
        let fixture = Fixture::new();
        assert_eq!(
            fixture.render("#set($x = 'outer')#foreach($x in [1, 2])$x#end$x"),
            "12outer"
        );
    }

    #[test]
    fn compile_error_carries_source() {
        let err = Template::compile("#if($a").unwrap_err();
        match err {
            TemplateError::Compile { source_text, .. } => assert_eq!(source_text, "#if($a"),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn render_error_from_util() {
        let fixture = Fixture::new();
        let ctx = RenderContext {
            context: &fixture.context,
            input: Input {
                params: &fixture.params,
                payload: &fixture.payload,
                body: &fixture.body,
            },
            stage_variables: &fixture.stage_variables,
        };
        let template = Template::compile("$util.parseJson('{')").unwrap();
        assert!(matches!(template.render(&ctx), Err(TemplateError::Render(_))));
    }

    #[test]
    fn rendering_is_repeatable() {
        let mut fixture = Fixture::new();
        fixture.payload = json!({ "a": 1 });
        let template = Template::compile("#set($v = $input.path('$.a') + 1)$v").unwrap();
        let ctx = RenderContext {
            context: &fixture.context,
            input: Input {
                params: &fixture.params,
                payload: &fixture.payload,
                body: &fixture.body,
            },
            stage_variables: &fixture.stage_variables,
        };
        assert_eq!(template.render(&ctx).unwrap(), "2");
        assert_eq!(template.render(&ctx).unwrap(), "2");
    }
}
