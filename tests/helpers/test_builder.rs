use std::rc::Rc;

use dev_module_graph::EnvironmentModuleGraph;
use dev_module_graph::MemoryResolver;
use dev_module_graph::UnifiedModuleGraph;
use dev_module_graph::BROWSER_ENVIRONMENT;
use dev_module_graph::SERVER_ENVIRONMENT;

pub struct TestGraphs {
  pub unified: UnifiedModuleGraph,
  pub browser: Rc<EnvironmentModuleGraph>,
  pub server: Rc<EnvironmentModuleGraph>,
}

pub struct TestBuilder {
  browser_resolver: MemoryResolver,
  server_resolver: MemoryResolver,
}

impl TestBuilder {
  pub fn new() -> Self {
    Self {
      browser_resolver: Default::default(),
      server_resolver: Default::default(),
    }
  }

  /// Configures the resolvers of both environments.
  pub fn with_resolver(
    &mut self,
    mut action: impl FnMut(&mut MemoryResolver),
  ) -> &mut Self {
    action(&mut self.browser_resolver);
    action(&mut self.server_resolver);
    self
  }

  #[allow(dead_code)]
  pub fn with_server_resolver(
    &mut self,
    mut action: impl FnMut(&mut MemoryResolver),
  ) -> &mut Self {
    action(&mut self.server_resolver);
    self
  }

  pub fn build(&mut self) -> TestGraphs {
    let browser = Rc::new(EnvironmentModuleGraph::new(
      BROWSER_ENVIRONMENT,
      Rc::new(std::mem::take(&mut self.browser_resolver)),
    ));
    let server = Rc::new(EnvironmentModuleGraph::new(
      SERVER_ENVIRONMENT,
      Rc::new(std::mem::take(&mut self.server_resolver)),
    ));
    let unified =
      UnifiedModuleGraph::new(vec![browser.clone(), server.clone()]).unwrap();
    TestGraphs {
      unified,
      browser,
      server,
    }
  }
}
